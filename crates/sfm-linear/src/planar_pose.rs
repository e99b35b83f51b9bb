use nalgebra::{Rotation3, Translation3, UnitQuaternion};
use sfm_core::{GeometryError, GeometryResult, Iso3, Mat3, Real};

/// Pose `T_C_P` of the plane `Z = 0` from a homography mapping plane
/// coordinates to **normalized** image coordinates.
///
/// The homography sign is chosen so that the plane lies in front of the camera.
pub fn planar_pose_from_homography(h: &Mat3) -> GeometryResult<Iso3> {
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();

    let norm = 0.5 * (h1.norm() + h2.norm());
    if norm <= Real::EPSILON {
        return Err(GeometryError::Degenerate("rank-deficient homography"));
    }
    let mut lambda = 1.0 / norm;
    if h3.z < 0.0 {
        lambda = -lambda;
    }

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r_mat = Mat3::from_columns(&[r1, r2, r1.cross(&r2)]);

    let svd = r_mat.svd(true, true);
    let mut u = svd.u.ok_or(GeometryError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(GeometryError::SvdFailed)?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        u.column_mut(svd.singular_values.imin()).neg_mut();
        r = u * v_t;
    }

    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    Ok(Iso3::from_parts(Translation3::from(h3 * lambda), rot))
}
