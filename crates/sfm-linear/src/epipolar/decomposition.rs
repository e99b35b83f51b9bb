use crate::triangulation::triangulate_point_linear;
use nalgebra::{Rotation3, Translation3, UnitQuaternion};
use sfm_core::{ensure_correspondences, GeometryError, GeometryResult, Iso3, Mat3, Pt2, Vec3};

/// The four `(R, t)` factorizations of an essential matrix; `t` has unit length.
pub fn decompose_essential(e: &Mat3) -> GeometryResult<Vec<(Mat3, Vec3)>> {
    let svd = e.svd(true, true);
    let mut u = svd.u.ok_or(GeometryError::SvdFailed)?;
    let mut v_t = svd.v_t.ok_or(GeometryError::SvdFailed)?;

    if u.determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    if v_t.determinant() < 0.0 {
        v_t.row_mut(2).neg_mut();
    }

    let w = Mat3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
    let r1 = u * w * v_t;
    let r2 = u * w.transpose() * v_t;
    let t: Vec3 = u.column(2).normalize();

    Ok(vec![(r1, t), (r1, -t), (r2, t), (r2, -t)])
}

/// Relative pose `T_1_0` from an essential matrix, chosen by cheirality.
///
/// Every factorization triangulates the correspondences; the one with the
/// most points in front of both cameras wins. Translation has unit length.
pub fn relative_pose_from_essential(e: &Mat3, x0: &[Pt2], x1: &[Pt2]) -> GeometryResult<Iso3> {
    ensure_correspondences(x0.len(), x1.len(), 1)?;

    let mut best: Option<(usize, Iso3)> = None;
    for (r, t) in decompose_essential(e)? {
        let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
        let pose = Iso3::from_parts(Translation3::from(t), rot);
        let poses = [Iso3::identity(), pose];
        let in_front = x0
            .iter()
            .zip(x1)
            .filter(|(p, q)| triangulate_point_linear(&poses, &[**p, **q]).is_ok())
            .count();
        if best.as_ref().map_or(true, |(n, _)| in_front > *n) {
            best = Some((in_front, pose));
        }
    }

    match best {
        Some((n, pose)) if n > 0 => Ok(pose),
        _ => Err(GeometryError::Degenerate("no factorization places points in front")),
    }
}
