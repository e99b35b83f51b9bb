use crate::{Mat3, Pt2, Real};
use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};

/// Standard pinhole intrinsics with optional skew.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FxFyCxCySkew {
    /// Focal length in pixels along X.
    pub fx: Real,
    /// Focal length in pixels along Y.
    pub fy: Real,
    /// Principal point X coordinate in pixels.
    pub cx: Real,
    /// Principal point Y coordinate in pixels.
    pub cy: Real,
    /// Skew term (typically 0).
    #[serde(default)]
    pub skew: Real,
}

impl FxFyCxCySkew {
    pub fn new(fx: Real, fy: Real, cx: Real, cy: Real) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            skew: 0.0,
        }
    }

    /// Return the 3x3 camera intrinsics matrix K.
    pub fn k_matrix(&self) -> Mat3 {
        Mat3::new(
            self.fx, self.skew, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0,
        )
    }

    /// Map normalized image coordinates to pixels.
    pub fn to_pixel(&self, n: &Pt2) -> Pt2 {
        Pt2::new(
            self.fx * n.x + self.skew * n.y + self.cx,
            self.fy * n.y + self.cy,
        )
    }

    /// Map pixels to normalized image coordinates.
    pub fn to_normalized(&self, px: &Pt2) -> Pt2 {
        let y = (px.y - self.cy) / self.fy;
        let x = (px.x - self.cx - self.skew * y) / self.fx;
        Pt2::new(x, y)
    }

    /// Jacobian of [`Self::to_pixel`] with respect to the normalized point.
    pub fn pixel_jacobian(&self) -> Matrix2<Real> {
        Matrix2::new(self.fx, self.skew, 0.0, self.fy)
    }

    /// Mean focal length, used to convert pixel thresholds to normalized units.
    pub fn mean_focal(&self) -> Real {
        0.5 * (self.fx.abs() + self.fy.abs())
    }
}
