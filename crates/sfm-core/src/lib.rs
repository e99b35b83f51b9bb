//! Core math and geometry primitives for the `sfm` workspace.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Pt3`, `Iso3`, ...),
//! - the calibrated camera model (pinhole intrinsics + lens distortion),
//! - a generic adaptive RANSAC engine ([`ransac`], [`Estimator`]),
//! - IRLS weighting and consensus scoring helpers,
//! - the shared [`GeometryError`] taxonomy.
//!
//! Poses are world-to-camera (`T_C_W`) isometries throughout the workspace.

/// Error taxonomy shared by all solvers.
pub mod error;
/// Linear algebra type aliases and helpers.
pub mod math;
/// Camera models and distortion utilities.
pub mod models;
/// Generic RANSAC engine and traits.
pub mod ransac;
/// IRLS weights and consensus scores.
pub mod robust;

pub use error::*;
pub use math::*;
pub use models::*;
pub use ransac::*;
pub use robust::*;
