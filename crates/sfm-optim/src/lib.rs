//! Robust estimation on top of the linear solvers in `sfm-linear`.
//!
//! Each estimator pairs a minimal solver with the generic RANSAC engine from
//! `sfm-core`, then polishes the consensus model with Levenberg-Marquardt under IRLS
//! weights. Thresholds in [`RansacOptions`] are in pixels for image-space
//! estimators and in world units for [`rigid_pose_ransac`].

mod observation;
mod pose;
mod refine;
mod stereo;
mod triangulation;

pub use observation::RayObservation;
pub use pose::*;
pub use refine::{
    refine_planar_pose, refine_pnp_pose, refine_point, refine_rigid_pose, refine_stereo_pose,
    RefineOptions,
};
pub use stereo::*;
pub use triangulation::*;

use log::debug;
use sfm_core::{GeometryError, GeometryResult, RansacOptions, RansacResult};

/// Refinement settings matching a RANSAC run: IRLS knee at the inlier threshold.
pub(crate) fn refine_for(opts: &RansacOptions) -> RefineOptions {
    RefineOptions::with_thresh(opts.thresh)
}

pub(crate) fn ransac_outcome<M>(
    label: &str,
    n: usize,
    res: RansacResult<M>,
) -> GeometryResult<(M, Vec<usize>)> {
    match res.model {
        Some(model) if res.success => {
            debug!(
                "{label}: {}/{n} inliers, eval {:.3} after {} iterations",
                res.inliers.len(),
                res.eval,
                res.iters
            );
            Ok((model, res.inliers))
        }
        _ => {
            debug!(
                "{label}: no consensus over {n} samples (eval {:.3}, {} iterations)",
                res.eval, res.iters
            );
            Err(GeometryError::RansacFailed)
        }
    }
}
