use sfm_core::{CameraModel, FxFyCxCySkew, Iso3, Pt2, Pt3, Real};

/// One view's observation of a world point, pre-undistorted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayObservation {
    /// `T_C_W` of the observing camera.
    pub pose: Iso3,
    pub intrinsics: FxFyCxCySkew,
    /// Observed pixel in the undistorted pixel frame.
    pub pixel: Pt2,
    /// Observed pixel in normalized image coordinates.
    pub normalized: Pt2,
}

impl RayObservation {
    pub fn new(pose: Iso3, camera: &CameraModel, pixel: &Pt2) -> Self {
        let normalized = camera.pixel_to_normalized(pixel);
        Self {
            pose,
            intrinsics: camera.intrinsics,
            pixel: camera.intrinsics.to_pixel(&normalized),
            normalized,
        }
    }

    /// Pixel reprojection error of `point`; infinite behind the camera.
    pub fn reprojection_error(&self, point: &Pt3) -> Real {
        let p_c = self.pose.transform_point(point);
        if p_c.z <= Real::EPSILON {
            return Real::INFINITY;
        }
        let proj = self
            .intrinsics
            .to_pixel(&Pt2::new(p_c.x / p_c.z, p_c.y / p_c.z));
        (proj - self.pixel).norm()
    }

    /// Camera centre in world coordinates.
    pub fn center(&self) -> Pt3 {
        sfm_core::camera_center(&self.pose)
    }
}
