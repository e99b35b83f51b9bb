//! Closed-form and linear minimal solvers for multi-view geometry.
//!
//! All image-space inputs are **normalized** coordinates (undistorted, with
//! `K^{-1}` applied); camera models live in `sfm-core` and the robust
//! wrappers that consume these solvers live in `sfm-optim`.
//!
//! - [`rigid_transform`]: 3D-3D alignment (Kabsch).
//! - [`pnp::p3p`] / [`pnp::dlt`]: 2D-3D pose.
//! - [`epipolar`]: 8-point essential matrix, decomposition and cheirality.
//! - [`dlt_homography`] / [`planar_pose_from_homography`]: 2D-2D planar pose.
//! - [`triangulate_point_linear`]: multi-view point triangulation.

pub mod epipolar;
pub mod math;
pub mod pnp;

mod homography;
mod planar_pose;
mod rigid;
mod triangulation;

pub use homography::*;
pub use planar_pose::*;
pub use rigid::rigid_transform;
pub use triangulation::*;
