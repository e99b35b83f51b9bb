use crate::math::{mat3_from_vec, normalize_points_2d, null_vector};
use nalgebra::DMatrix;
use sfm_core::{
    ensure_correspondences, skew, to_homogeneous, GeometryError, GeometryResult, Iso3, Mat3, Pt2,
    Real, Vec3,
};

/// Normalized 8-point estimate of the essential matrix with `x1^T E x0 = 0`.
///
/// Inputs are normalized image coordinates in the first and second view.
/// The result is projected onto the essential manifold (singular values `(s, s, 0)`).
pub fn essential_8point(x0: &[Pt2], x1: &[Pt2]) -> GeometryResult<Mat3> {
    ensure_correspondences(x0.len(), x1.len(), 8)?;
    let (x0n, t0) = normalize_points_2d(x0).ok_or(GeometryError::Degenerate("coincident points"))?;
    let (x1n, t1) = normalize_points_2d(x1).ok_or(GeometryError::Degenerate("coincident points"))?;

    let mut a = DMatrix::<Real>::zeros(x0.len(), 9);
    for (i, (p, q)) in x0n.iter().zip(&x1n).enumerate() {
        let row = [
            q.x * p.x,
            q.x * p.y,
            q.x,
            q.y * p.x,
            q.y * p.y,
            q.y,
            p.x,
            p.y,
            1.0,
        ];
        for (j, v) in row.into_iter().enumerate() {
            a[(i, j)] = v;
        }
    }

    let f = mat3_from_vec(&null_vector(&a)?);
    enforce_essential_constraints(&(t1.transpose() * f * t0))
}

/// Project a 3x3 matrix onto the essential manifold: singular values `(s, s, 0)`.
pub fn enforce_essential_constraints(e: &Mat3) -> GeometryResult<Mat3> {
    let svd = e.svd(true, true);
    let u = svd.u.ok_or(GeometryError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(GeometryError::SvdFailed)?;
    let s = 0.5 * (svd.singular_values[0] + svd.singular_values[1]);
    if s <= Real::EPSILON {
        return Err(GeometryError::Degenerate("vanishing essential matrix"));
    }
    let e = u * Mat3::from_diagonal(&Vec3::new(1.0, 1.0, 0.0)) * v_t;
    Ok(e / e.norm())
}

/// Essential matrix `[t]x R` of a relative pose `T_1_0`.
pub fn essential_from_pose(pose: &Iso3) -> Mat3 {
    skew(&pose.translation.vector) * pose.rotation.to_rotation_matrix().matrix()
}

/// First-order geometric (Sampson) distance of a correspondence to `E`, in
/// normalized image units.
pub fn sampson_distance(e: &Mat3, x0: &Pt2, x1: &Pt2) -> Real {
    let p = to_homogeneous(x0);
    let q = to_homogeneous(x1);
    let ep = e * p;
    let etq = e.transpose() * q;
    let num = q.dot(&ep);
    let den = ep.x * ep.x + ep.y * ep.y + etq.x * etq.x + etq.y * etq.y;
    if den <= Real::EPSILON * Real::EPSILON {
        return num.abs();
    }
    num.abs() / den.sqrt()
}
