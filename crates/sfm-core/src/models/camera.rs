use super::{Distortion, DistortionModel, FxFyCxCySkew};
use crate::{Iso3, Pt2, Pt3, Real, Vec3};
use serde::{Deserialize, Serialize};

/// Pinhole camera with optional lens distortion.
///
/// Pixels are produced as `K * distort(x / z, y / z)`. Reprojection errors are
/// measured in the undistorted pixel frame `K * (x / z, y / z)` so that every
/// solver downstream can stay linear in `K`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub intrinsics: FxFyCxCySkew,
    #[serde(default)]
    pub distortion: Distortion,
}

impl CameraModel {
    pub fn new(intrinsics: FxFyCxCySkew, distortion: Distortion) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    pub fn pinhole(intrinsics: FxFyCxCySkew) -> Self {
        Self::new(intrinsics, Distortion::None)
    }

    /// Project a camera-frame point to (distorted) pixels; `None` behind the camera.
    pub fn project_point(&self, p_c: &Pt3) -> Option<Pt2> {
        let n = normalize(p_c)?;
        Some(self.intrinsics.to_pixel(&self.distortion.distort(&n)))
    }

    /// Project a camera-frame point with `K` only.
    pub fn project_undistorted(&self, p_c: &Pt3) -> Option<Pt2> {
        normalize(p_c).map(|n| self.intrinsics.to_pixel(&n))
    }

    /// Undistorted normalized coordinates of an observed pixel.
    pub fn pixel_to_normalized(&self, px: &Pt2) -> Pt2 {
        self.distortion
            .undistort(&self.intrinsics.to_normalized(px))
    }

    /// Observed pixel moved into the undistorted pixel frame.
    pub fn undistort_pixel(&self, px: &Pt2) -> Pt2 {
        self.intrinsics.to_pixel(&self.pixel_to_normalized(px))
    }

    /// Unit viewing ray of a pixel in the camera frame.
    pub fn backproject_ray(&self, px: &Pt2) -> Vec3 {
        let n = self.pixel_to_normalized(px);
        Vec3::new(n.x, n.y, 1.0).normalize()
    }

    pub fn mean_focal(&self) -> Real {
        self.intrinsics.mean_focal()
    }

    /// Reprojection error (pixels) of a world point observed at `px` by a camera at `pose`.
    ///
    /// Points at or behind the image plane get an infinite error.
    pub fn reprojection_error(&self, pose: &Iso3, px: &Pt2, point: &Pt3) -> Real {
        match self.project_undistorted(&pose.transform_point(point)) {
            Some(proj) => (proj - self.undistort_pixel(px)).norm(),
            None => Real::INFINITY,
        }
    }
}

fn normalize(p_c: &Pt3) -> Option<Pt2> {
    if p_c.z <= Real::EPSILON {
        return None;
    }
    Some(Pt2::new(p_c.x / p_c.z, p_c.y / p_c.z))
}
