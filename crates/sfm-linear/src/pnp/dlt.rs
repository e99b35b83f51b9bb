use crate::math::{mat34_from_vec, normalize_points_3d, null_vector};
use nalgebra::{DMatrix, Rotation3, Translation3, UnitQuaternion};
use sfm_core::{ensure_correspondences, GeometryError, GeometryResult, Iso3, Pt2, Pt3, Real};

/// Direct linear PnP on six or more points.
///
/// World points are Hartley-normalized, `[R | t]` is read from the null space
/// of the `2n x 12` design matrix and the rotation block is projected onto SO(3).
pub fn dlt(world: &[Pt3], normalized: &[Pt2]) -> GeometryResult<Iso3> {
    ensure_correspondences(world.len(), normalized.len(), 6)?;
    let n = world.len();
    let (world_n, t_world) = normalize_points_3d(world)
        .ok_or(GeometryError::Degenerate("coincident world points"))?;

    let mut a = DMatrix::<Real>::zeros(2 * n, 12);
    for (i, (pw, pi)) in world_n.iter().zip(normalized).enumerate() {
        let xh = [pw.x, pw.y, pw.z, 1.0];
        for (j, &x) in xh.iter().enumerate() {
            a[(2 * i, j)] = x;
            a[(2 * i, 8 + j)] = -pi.x * x;
            a[(2 * i + 1, 4 + j)] = x;
            a[(2 * i + 1, 8 + j)] = -pi.y * x;
        }
    }

    let p = mat34_from_vec(&null_vector(&a)?) * t_world;
    let m = p.fixed_view::<3, 3>(0, 0).into_owned();

    let mut s = (m.row(0).norm() + m.row(1).norm() + m.row(2).norm()) / 3.0;
    if s <= Real::EPSILON {
        return Err(GeometryError::Degenerate("vanishing projection matrix"));
    }
    if m.determinant() < 0.0 {
        s = -s;
    }
    let r_approx = m / s;

    let svd = r_approx.svd(true, true);
    let mut u = svd.u.ok_or(GeometryError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(GeometryError::SvdFailed)?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        u.column_mut(svd.singular_values.imin()).neg_mut();
        r = u * v_t;
    }

    let t = p.column(3) / s;
    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    Ok(Iso3::from_parts(Translation3::from(t), rot))
}
