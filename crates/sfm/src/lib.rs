//! High-level entry crate for the incremental structure-from-motion toolbox.
//!
//! The engine lives in [`pipeline`]: feed it calibrated views and call
//! [`pipeline::SfmEngine::update`] until every view is registered.
//!
//! ```no_run
//! use sfm::pipeline::synthetic::SyntheticConfig;
//! use sfm::pipeline::{EngineConfig, SfmEngine};
//!
//! let scene = SyntheticConfig::default().build();
//! let mut engine = SfmEngine::new(EngineConfig::default(), Box::new(scene.detector()));
//! for image in &scene.images {
//!     engine.add_view(scene.camera, image.clone(), None);
//! }
//! for _ in 0..10 {
//!     if !engine.update(1) {
//!         break;
//!     }
//! }
//! println!("{} map points", engine.map_point_count());
//! ```
//!
//! The geometry layers underneath are usable on their own:
//!
//! ```no_run
//! use sfm::core::{CameraModel, FxFyCxCySkew, Pt2, Pt3, RansacOptions};
//! use sfm::optim::pnp_ransac;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let camera = CameraModel::pinhole(FxFyCxCySkew::new(800.0, 800.0, 640.0, 360.0));
//! let pixels: Vec<Pt2> = /* detections */
//! # vec![];
//! let world: Vec<Pt3> = /* known landmarks */
//! # vec![];
//! let (pose, inliers) = pnp_ransac(&camera, &pixels, &world, &RansacOptions::with_thresh(4.0))?;
//! println!("{} inliers, t = {}", inliers.len(), pose.translation.vector);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - **[`core`]**: math aliases, camera models, the RANSAC driver
//! - **[`linear`]**: closed-form minimal solvers
//! - **[`optim`]**: Levenberg-Marquardt refinement and robust estimators
//! - **[`pipeline`]**: the incremental mapping engine
//! - **[`prelude`]**: common re-exports

/// Math aliases, camera models, the RANSAC driver and the error taxonomy.
pub mod core {
    pub use sfm_core::*;
}

/// Closed-form solvers (Kabsch, P3P, DLT, 8-point essential, homography, triangulation).
pub mod linear {
    pub use sfm_linear::*;
}

/// IRLS Levenberg-Marquardt refinement and RANSAC-wrapped estimators.
pub mod optim {
    pub use sfm_optim::*;
}

/// The incremental engine, its scene model and the synthetic scene builder.
pub mod pipeline {
    pub use sfm_pipeline::*;
}

/// Convenient re-exports for common use cases.
///
/// Import with `use sfm::prelude::*;`.
pub mod prelude {
    pub use sfm_core::{CameraModel, FxFyCxCySkew, Iso3, Pt2, Pt3, RansacOptions, Real};
    pub use sfm_pipeline::{
        EngineConfig, Feature, FeatureDetector, MapPoint, PoseState, SfmEngine, View,
    };
}
