use nalgebra::{Isometry3, Matrix3, Matrix3x4, Matrix4, Point2, Point3, Vector2, Vector3};

pub type Real = f64;

pub type Vec2 = Vector2<Real>;
pub type Vec3 = Vector3<Real>;
pub type Pt2 = Point2<Real>;
pub type Pt3 = Point3<Real>;
pub type Mat3 = Matrix3<Real>;
pub type Mat4 = Matrix4<Real>;
pub type Mat34 = Matrix3x4<Real>;
pub type Iso3 = Isometry3<Real>;

pub fn to_homogeneous(p: &Pt2) -> Vec3 {
    Vec3::new(p.x, p.y, 1.0)
}

pub fn from_homogeneous(v: &Vec3) -> Pt2 {
    Pt2::new(v.x / v.z, v.y / v.z)
}

/// Cross-product matrix `[v]x`, so that `skew(a) * b == a.cross(&b)`.
pub fn skew(v: &Vec3) -> Mat3 {
    Mat3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// `[R | t]` of a world-to-camera pose.
pub fn projection_matrix(pose: &Iso3) -> Mat34 {
    let mut p = Mat34::zeros();
    p.fixed_view_mut::<3, 3>(0, 0)
        .copy_from(pose.rotation.to_rotation_matrix().matrix());
    p.set_column(3, &pose.translation.vector);
    p
}

/// Camera centre in world coordinates for a world-to-camera pose.
pub fn camera_center(pose: &Iso3) -> Pt3 {
    pose.inverse_transform_point(&Pt3::origin())
}

/// Angle (radians) between the rotations of two poses.
pub fn rotation_angle(a: &Iso3, b: &Iso3) -> Real {
    a.rotation.angle_to(&b.rotation)
}

/// Angle (radians) subtended at `point` by two camera centres.
///
/// Returns zero when either centre coincides with the point.
pub fn parallax_angle(point: &Pt3, c0: &Pt3, c1: &Pt3) -> Real {
    let v0 = c0 - point;
    let v1 = c1 - point;
    let denom = v0.norm() * v1.norm();
    if denom <= Real::EPSILON {
        return 0.0;
    }
    (v0.dot(&v1) / denom).clamp(-1.0, 1.0).acos()
}

/// Median of a slice; the mean of the two middle values for even lengths.
pub fn median(values: &[Real]) -> Option<Real> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some(0.5 * (sorted[mid - 1] + sorted[mid]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_center_inverts_pose() {
        let center = Pt3::new(1.0, -2.0, 0.5);
        let rot = nalgebra::UnitQuaternion::from_euler_angles(0.1, -0.2, 0.3);
        let t = -(rot * center.coords);
        let pose = Iso3::from_parts(t.into(), rot);
        assert!((camera_center(&pose) - center).norm() < 1e-12);
    }

    #[test]
    fn parallax_of_orthogonal_rays() {
        let p = Pt3::origin();
        let a = parallax_angle(&p, &Pt3::new(1.0, 0.0, 0.0), &Pt3::new(0.0, 3.0, 0.0));
        assert!((a - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert_eq!(parallax_angle(&p, &p, &Pt3::new(1.0, 0.0, 0.0)), 0.0);
    }

    #[test]
    fn median_handles_odd_and_even() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn skew_matches_cross_product() {
        let a = Vec3::new(0.3, -1.0, 2.0);
        let b = Vec3::new(-0.7, 0.2, 0.9);
        assert!((skew(&a) * b - a.cross(&b)).norm() < 1e-15);
    }
}
