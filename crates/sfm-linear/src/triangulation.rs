//! Linear triangulation of a 3D point from two or more calibrated views.

use crate::math::null_vector;
use nalgebra::DMatrix;
use sfm_core::{
    ensure_correspondences, projection_matrix, GeometryError, GeometryResult, Iso3, Pt2, Pt3, Real,
};

/// DLT triangulation from `T_C_W` poses and normalized image coordinates.
///
/// Fails with [`GeometryError::Degenerate`] when the solution lies at infinity
/// or behind any of the cameras.
pub fn triangulate_point_linear(poses: &[Iso3], normalized: &[Pt2]) -> GeometryResult<Pt3> {
    ensure_correspondences(poses.len(), normalized.len(), 2)?;

    let mut a = DMatrix::<Real>::zeros(2 * poses.len(), 4);
    for (i, (pose, x)) in poses.iter().zip(normalized).enumerate() {
        let p = projection_matrix(pose);
        a.row_mut(2 * i)
            .copy_from(&(x.x * p.row(2) - p.row(0)));
        a.row_mut(2 * i + 1)
            .copy_from(&(x.y * p.row(2) - p.row(1)));
    }

    let xh = null_vector(&a)?;
    let w = xh[3];
    if w.abs() <= Real::EPSILON * xh.norm() {
        return Err(GeometryError::Degenerate("point at infinity"));
    }
    let point = Pt3::new(xh[0] / w, xh[1] / w, xh[2] / w);

    if poses.iter().any(|pose| pose.transform_point(&point).z <= 0.0) {
        return Err(GeometryError::Degenerate("point behind a camera"));
    }
    Ok(point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfm_core::Vec3;

    fn project(pose: &Iso3, p: &Pt3) -> Pt2 {
        let pc = pose.transform_point(p);
        Pt2::new(pc.x / pc.z, pc.y / pc.z)
    }

    #[test]
    fn two_views_recover_point() {
        let poses = [Iso3::identity(), Iso3::translation(-0.2, 0.0, 0.0)];
        let pw = Pt3::new(0.1, -0.05, 2.0);
        let obs: Vec<Pt2> = poses.iter().map(|p| project(p, &pw)).collect();
        let est = triangulate_point_linear(&poses, &obs).unwrap();
        assert!((est - pw).norm() < 1e-9);
    }

    #[test]
    fn many_views_recover_point() {
        let poses: Vec<Iso3> = (0..5)
            .map(|i| {
                let a = 0.05 * i as f64;
                Iso3::new(Vec3::new(-0.3 * i as f64, 0.02, 0.1), Vec3::new(0.0, a, 0.0))
            })
            .collect();
        let pw = Pt3::new(0.4, 0.2, 3.0);
        let obs: Vec<Pt2> = poses.iter().map(|p| project(p, &pw)).collect();
        let est = triangulate_point_linear(&poses, &obs).unwrap();
        assert!((est - pw).norm() < 1e-8);
    }

    #[test]
    fn point_behind_camera_is_degenerate() {
        let poses = [Iso3::identity(), Iso3::translation(-0.2, 0.0, 0.0)];
        let pw = Pt3::new(0.1, -0.05, -2.0);
        let obs: Vec<Pt2> = poses
            .iter()
            .map(|p| {
                let pc = p.transform_point(&pw);
                Pt2::new(pc.x / pc.z, pc.y / pc.z)
            })
            .collect();
        assert!(matches!(
            triangulate_point_linear(&poses, &obs),
            Err(GeometryError::Degenerate(_))
        ));
    }
}
