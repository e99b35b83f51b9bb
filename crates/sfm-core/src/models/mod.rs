//! Camera model: pinhole intrinsics plus an optional lens distortion stage.
//!
//! The combined mapping is `pixel = K * distortion(x / z, y / z)`.

mod camera;
mod distortion;
mod intrinsics;

pub use camera::*;
pub use distortion::*;
pub use intrinsics::*;
