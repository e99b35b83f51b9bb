//! Two-view epipolar geometry on **normalized** image coordinates.
//!
//! Convention: `x1^T E x0 = 0` where `x1 = R x0 + t` for the relative pose
//! `T_1_0` that maps first-camera coordinates into the second camera.

mod decomposition;
mod essential;

pub use decomposition::{decompose_essential, relative_pose_from_essential};
pub use essential::{
    enforce_essential_constraints, essential_8point, essential_from_pose, sampson_distance,
};
