use crate::observation::RayObservation;
use crate::refine::{refine_point, RefineOptions};
use crate::{ransac_outcome, refine_for};
use sfm_core::{ransac, Estimator, GeometryError, GeometryResult, Iso3, Pt2, Pt3, RansacOptions, Real};
use sfm_linear::triangulate_point_linear;

fn linear(observations: &[RayObservation], idx: &[usize]) -> GeometryResult<Pt3> {
    let poses: Vec<Iso3> = idx.iter().map(|&i| observations[i].pose).collect();
    let normalized: Vec<Pt2> = idx.iter().map(|&i| observations[i].normalized).collect();
    triangulate_point_linear(&poses, &normalized)
}

fn subset(observations: &[RayObservation], idx: &[usize]) -> Vec<RayObservation> {
    idx.iter().map(|&i| observations[i]).collect()
}

struct TriangulationEstimator {
    refine: RefineOptions,
}

impl Estimator for TriangulationEstimator {
    type Datum = RayObservation;
    type Model = Pt3;

    const MIN_SAMPLES: usize = 2;

    fn fit(&self, data: &[RayObservation], sample: &[usize]) -> Vec<Pt3> {
        linear(data, sample).into_iter().collect()
    }

    fn residual(&self, model: &Pt3, datum: &RayObservation) -> Real {
        datum.reprojection_error(model)
    }

    fn solve(&self, data: &[RayObservation], indices: &[usize]) -> Option<Pt3> {
        let init = linear(data, indices).ok()?;
        refine_point(&init, &subset(data, indices), &self.refine).ok()
    }

    fn polish(&self, data: &[RayObservation], indices: &[usize], model: &Pt3) -> Option<Pt3> {
        refine_point(model, &subset(data, indices), &self.refine)
            .ok()
            .or_else(|| self.solve(data, indices))
    }
}

/// Linear triangulation over all observations followed by IRLS refinement.
pub fn triangulate_point(
    observations: &[RayObservation],
    opts: &RefineOptions,
) -> GeometryResult<Pt3> {
    let all: Vec<usize> = (0..observations.len()).collect();
    if all.len() < 2 {
        return Err(GeometryError::NotEnoughData {
            needed: 2,
            got: all.len(),
        });
    }
    let init = linear(observations, &all)?;
    refine_point(&init, observations, opts)
}

/// Two-view RANSAC triangulation; `opts.thresh` is in pixels.
///
/// With fewer than `2 * min_rate` observations this is [`triangulate_point`].
pub fn triangulate_point_ransac(
    observations: &[RayObservation],
    opts: &RansacOptions,
) -> GeometryResult<(Pt3, Vec<usize>)> {
    if observations.len() < TriangulationEstimator::MIN_SAMPLES {
        return Err(GeometryError::NotEnoughData {
            needed: TriangulationEstimator::MIN_SAMPLES,
            got: observations.len(),
        });
    }
    let est = TriangulationEstimator {
        refine: refine_for(opts),
    };
    ransac_outcome(
        "triangulation",
        observations.len(),
        ransac(&est, observations, opts),
    )
}
