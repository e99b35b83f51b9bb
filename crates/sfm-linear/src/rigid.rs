//! Closed-form rigid alignment of 3D point sets (Kabsch).

use nalgebra::{Rotation3, Translation3, UnitQuaternion};
use sfm_core::{ensure_correspondences, GeometryError, GeometryResult, Iso3, Mat3, Pt3, Real, Vec3};

/// Rigid transform `T` minimizing `sum |to_i - T * from_i|²`.
///
/// Needs at least three non-collinear pairs.
pub fn rigid_transform(from: &[Pt3], to: &[Pt3]) -> GeometryResult<Iso3> {
    ensure_correspondences(from.len(), to.len(), 3)?;
    let to: Vec<Vec3> = to.iter().map(|p| p.coords).collect();
    align(from, &to)
}

/// Kabsch on world points and their camera-frame coordinates.
pub(crate) fn align(world: &[Pt3], camera: &[Vec3]) -> GeometryResult<Iso3> {
    let n = world.len() as Real;
    let c_w = world.iter().fold(Vec3::zeros(), |acc, p| acc + p.coords) / n;
    let c_c = camera.iter().fold(Vec3::zeros(), |acc, p| acc + p) / n;

    let mut h = Mat3::zeros();
    for (pw, pc) in world.iter().zip(camera) {
        h += (pc - c_c) * (pw.coords - c_w).transpose();
    }

    let svd = h.svd(true, true);
    let mut u = svd.u.ok_or(GeometryError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(GeometryError::SvdFailed)?;
    let s = svd.singular_values;
    let middle = s.sum() - s.max() - s.min();
    if middle <= 1e-10 * s.max() {
        return Err(GeometryError::Degenerate("collinear point set"));
    }

    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let weakest = s.imin();
        u.column_mut(weakest).neg_mut();
        r = u * v_t;
    }

    let t = c_c - r * c_w;
    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    Ok(Iso3::from_parts(Translation3::from(t), rot))
}
