use crate::math::{mat3_from_vec, normalize_points_2d, null_vector};
use nalgebra::DMatrix;
use sfm_core::{ensure_correspondences, GeometryError, GeometryResult, Mat3, Pt2, Real};

/// Normalized DLT homography `H` with `image ~ H * plane`, scaled so `H[2,2] == 1`.
pub fn dlt_homography(plane: &[Pt2], image: &[Pt2]) -> GeometryResult<Mat3> {
    ensure_correspondences(plane.len(), image.len(), 4)?;
    let (plane_n, t_plane) =
        normalize_points_2d(plane).ok_or(GeometryError::Degenerate("coincident plane points"))?;
    let (image_n, t_image) =
        normalize_points_2d(image).ok_or(GeometryError::Degenerate("coincident image points"))?;

    let mut a = DMatrix::<Real>::zeros(2 * plane.len(), 9);
    for (i, (p, q)) in plane_n.iter().zip(&image_n).enumerate() {
        let (x, y, u, v) = (p.x, p.y, q.x, q.y);
        let r0 = 2 * i;
        let r1 = r0 + 1;

        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let h_n = mat3_from_vec(&null_vector(&a)?);
    let t_image_inv = t_image
        .try_inverse()
        .ok_or(GeometryError::Degenerate("singular normalization"))?;
    let h = t_image_inv * h_n * t_plane;

    let scale = h[(2, 2)];
    if scale.abs() <= Real::EPSILON {
        return Err(GeometryError::Degenerate("homography maps origin to infinity"));
    }
    Ok(h / scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfm_core::from_homogeneous;

    #[test]
    fn maps_square_onto_projective_quad() {
        let plane = vec![
            Pt2::new(0.0, 0.0),
            Pt2::new(1.0, 0.0),
            Pt2::new(1.0, 1.0),
            Pt2::new(0.0, 1.0),
        ];
        let gt = Mat3::new(2.0, 0.1, 3.0, -0.2, 1.5, 1.0, 0.01, 0.02, 1.0);
        let image: Vec<Pt2> = plane
            .iter()
            .map(|p| from_homogeneous(&(gt * sfm_core::to_homogeneous(p))))
            .collect();

        let h = dlt_homography(&plane, &image).unwrap();
        assert!((h - gt).norm() < 1e-9, "h = {h}");
    }
}
