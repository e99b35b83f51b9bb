use crate::{Pt2, Real};
use serde::{Deserialize, Serialize};

pub trait DistortionModel {
    fn distort(&self, n_undist: &Pt2) -> Pt2;
    fn undistort(&self, n_dist: &Pt2) -> Pt2;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NoDistortion;

impl DistortionModel for NoDistortion {
    fn distort(&self, n_undist: &Pt2) -> Pt2 {
        *n_undist
    }

    fn undistort(&self, n_dist: &Pt2) -> Pt2 {
        *n_dist
    }
}

/// Radial (k1, k2, k3) and tangential (p1, p2) lens distortion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BrownConrady5 {
    pub k1: Real,
    pub k2: Real,
    pub k3: Real,
    pub p1: Real,
    pub p2: Real,
    /// Fixed-point iterations used by [`DistortionModel::undistort`]; 0 means 8.
    #[serde(default)]
    pub iters: u32,
}

impl BrownConrady5 {
    fn distort_impl(&self, x: Real, y: Real) -> (Real, Real) {
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));

        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;

        (x * radial + x_tan, y * radial + y_tan)
    }
}

impl DistortionModel for BrownConrady5 {
    fn distort(&self, n_undist: &Pt2) -> Pt2 {
        let (xd, yd) = self.distort_impl(n_undist.x, n_undist.y);
        Pt2::new(xd, yd)
    }

    fn undistort(&self, n_dist: &Pt2) -> Pt2 {
        let (mut x, mut y) = (n_dist.x, n_dist.y);
        let iters = if self.iters == 0 { 8 } else { self.iters };
        for _ in 0..iters {
            let (xd, yd) = self.distort_impl(x, y);
            x -= xd - n_dist.x;
            y -= yd - n_dist.y;
        }
        Pt2::new(x, y)
    }
}

/// Serializable choice of lens distortion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Distortion {
    #[default]
    None,
    BrownConrady5 {
        #[serde(flatten)]
        params: BrownConrady5,
    },
}

impl DistortionModel for Distortion {
    fn distort(&self, n_undist: &Pt2) -> Pt2 {
        match self {
            Distortion::None => NoDistortion.distort(n_undist),
            Distortion::BrownConrady5 { params } => params.distort(n_undist),
        }
    }

    fn undistort(&self, n_dist: &Pt2) -> Pt2 {
        match self {
            Distortion::None => NoDistortion.undistort(n_dist),
            Distortion::BrownConrady5 { params } => params.undistort(n_dist),
        }
    }
}
