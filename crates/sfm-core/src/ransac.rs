//! Generic, model-agnostic RANSAC with an adaptive stopping rule.
//!
//! Implement [`Estimator`] for a model and call [`ransac`]. The driver
//!
//! 1. falls back to a plain non-robust [`Estimator::solve`] when there are
//!    fewer than `MIN_SAMPLES * min_rate` data,
//! 2. otherwise draws minimal samples, scores every candidate with
//!    [`ransac_eval`] and shrinks the iteration budget with [`adaptive_stop`],
//! 3. rejects a best model scoring under `min_eval` or supported by fewer
//!    than `MIN_SAMPLES * min_rate` inliers,
//! 4. keeps the data within twice the threshold of the best model and hands
//!    them to [`Estimator::polish`] for a final non-robust refinement.
//!
//! Failure never panics: the result carries `success == false` and no model.

use crate::robust::ransac_eval;
use crate::Real;
use log::trace;
use rand::prelude::IndexedRandom;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Configuration parameters for the RANSAC engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacOptions {
    /// Iteration ceiling.
    pub max_iters: usize,
    /// Inlier residual threshold, in the estimator's residual units.
    pub thresh: Real,
    /// RANSAC runs only when `data.len() >= MIN_SAMPLES * min_rate`, and a
    /// consensus needs at least that many inliers.
    pub min_rate: usize,
    /// Smallest evaluation score accepted as a consensus.
    pub min_eval: Real,
    /// Desired probability of drawing at least one all-inlier sample.
    pub confidence: Real,
    /// Stop sampling as soon as a candidate reaches this score.
    pub eval_ceiling: Real,
    /// Random-number generator seed.
    pub seed: u64,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 1000,
            thresh: 2.0,
            min_rate: 2,
            min_eval: 0.2,
            confidence: 0.99,
            eval_ceiling: 1.0,
            seed: 0,
        }
    }
}

impl RansacOptions {
    pub fn with_thresh(thresh: Real) -> Self {
        Self {
            thresh,
            ..Self::default()
        }
    }
}

/// Output of a RANSAC run.
#[derive(Debug, Clone)]
pub struct RansacResult<M> {
    pub success: bool,
    pub model: Option<M>,
    /// Indices of the data within `thresh` of the final model.
    pub inliers: Vec<usize>,
    /// Score of the final model, see [`ransac_eval`].
    pub eval: Real,
    /// Sampling iterations performed (0 on the non-robust path).
    pub iters: usize,
}

impl<M> Default for RansacResult<M> {
    fn default() -> Self {
        Self {
            success: false,
            model: None,
            inliers: Vec::new(),
            eval: 0.0,
            iters: 0,
        }
    }
}

/// A model that can be hypothesised from a minimal sample.
pub trait Estimator {
    type Datum;
    type Model: Clone;

    /// Minimal number of data needed to hypothesise a model.
    const MIN_SAMPLES: usize;

    /// Candidate models from a minimal sample; empty on degeneracy.
    fn fit(&self, data: &[Self::Datum], sample: &[usize]) -> Vec<Self::Model>;

    /// Non-negative residual of one datum, in the units of `RansacOptions::thresh`.
    fn residual(&self, model: &Self::Model, datum: &Self::Datum) -> Real;

    /// Non-robust estimate from the given subset.
    fn solve(&self, data: &[Self::Datum], indices: &[usize]) -> Option<Self::Model>;

    /// Refine a consensus model over its denoised support.
    fn polish(
        &self,
        data: &[Self::Datum],
        indices: &[usize],
        _model: &Self::Model,
    ) -> Option<Self::Model> {
        self.solve(data, indices)
    }
}

/// Iterations needed to draw an all-inlier sample of size `k` with probability
/// `confidence`, given an inlier `rate`. The rate is floored at 0.1 and the
/// result clamped to `[1, max_iters]`.
pub fn adaptive_stop(rate: Real, k: usize, confidence: Real, max_iters: usize) -> usize {
    let max_iters = max_iters.max(1);
    let all_inliers = rate.clamp(0.1, 1.0).powi(k as i32);
    if all_inliers >= 1.0 - 1e-12 {
        return 1;
    }
    let confidence = confidence.clamp(0.0, 1.0 - 1e-12);
    let n = 1.0 + (1.0 - confidence).ln() / (1.0 - all_inliers).ln();
    if !n.is_finite() {
        return max_iters;
    }
    (n.round().max(1.0) as usize).min(max_iters)
}

fn residuals<E: Estimator>(estimator: &E, model: &E::Model, data: &[E::Datum]) -> Vec<Real> {
    data.iter().map(|d| estimator.residual(model, d)).collect()
}

fn within(residuals: &[Real], thresh: Real) -> Vec<usize> {
    residuals
        .iter()
        .enumerate()
        .filter(|(_, &r)| r <= thresh)
        .map(|(i, _)| i)
        .collect()
}

/// Run RANSAC for a given [`Estimator`].
pub fn ransac<E: Estimator>(
    estimator: &E,
    data: &[E::Datum],
    opts: &RansacOptions,
) -> RansacResult<E::Model> {
    let k = E::MIN_SAMPLES;
    let n = data.len();
    if n < k {
        return RansacResult::default();
    }

    let min_inliers = k * opts.min_rate.max(1);
    if n < min_inliers {
        let all: Vec<usize> = (0..n).collect();
        let Some(model) = estimator.solve(data, &all) else {
            return RansacResult::default();
        };
        let res = residuals(estimator, &model, data);
        return RansacResult {
            success: true,
            inliers: within(&res, opts.thresh),
            eval: ransac_eval(&res, k, opts.thresh),
            model: Some(model),
            iters: 0,
        };
    }

    let all: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut best: Option<(E::Model, Real)> = None;
    let mut budget = opts.max_iters.max(1);
    let mut iters = 0;

    while iters < budget {
        iters += 1;
        let sample: Vec<usize> = all.choose_multiple(&mut rng, k).copied().collect();
        for model in estimator.fit(data, &sample) {
            let res = residuals(estimator, &model, data);
            let eval = ransac_eval(&res, k, opts.thresh);
            if best.as_ref().is_some_and(|(_, b)| eval <= *b) {
                continue;
            }
            let rate = res.iter().filter(|&&r| r <= opts.thresh).count() as Real / n as Real;
            budget = adaptive_stop(rate, k, opts.confidence, opts.max_iters);
            best = Some((model, eval));
        }
        if best
            .as_ref()
            .is_some_and(|(_, b)| *b >= opts.eval_ceiling)
        {
            break;
        }
    }

    let Some((model, eval)) = best else {
        return RansacResult {
            iters,
            ..RansacResult::default()
        };
    };
    if eval < opts.min_eval {
        trace!("ransac: best eval {eval:.3} below {:.3}", opts.min_eval);
        return RansacResult {
            iters,
            eval,
            ..RansacResult::default()
        };
    }

    let res = residuals(estimator, &model, data);
    let inlier_count = res.iter().filter(|&&r| r <= opts.thresh).count();
    if inlier_count < min_inliers {
        trace!("ransac: {inlier_count} inliers, need {min_inliers}");
        return RansacResult {
            iters,
            eval,
            ..RansacResult::default()
        };
    }

    let support = within(&res, 2.0 * opts.thresh);
    let model = match estimator.polish(data, &support, &model) {
        Some(polished) => polished,
        None => {
            trace!("ransac: polish failed on {} points, keeping sample model", support.len());
            model
        }
    };
    let res = residuals(estimator, &model, data);
    RansacResult {
        success: true,
        inliers: within(&res, opts.thresh),
        eval: ransac_eval(&res, k, opts.thresh),
        model: Some(model),
        iters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct LineModel {
        slope: f64,
        intercept: f64,
    }

    struct LineEstimator;

    impl LineEstimator {
        fn least_squares(data: &[(f64, f64)], idx: &[usize]) -> Option<LineModel> {
            if idx.len() < 2 {
                return None;
            }
            let (mut sx, mut sy, mut sxx, mut sxy) = (0.0, 0.0, 0.0, 0.0);
            for &i in idx {
                let (x, y) = data[i];
                sx += x;
                sy += y;
                sxx += x * x;
                sxy += x * y;
            }
            let n = idx.len() as f64;
            let denom = n * sxx - sx * sx;
            if denom.abs() < 1e-12 {
                return None;
            }
            let slope = (n * sxy - sx * sy) / denom;
            Some(LineModel {
                slope,
                intercept: (sy - slope * sx) / n,
            })
        }
    }

    impl Estimator for LineEstimator {
        type Datum = (f64, f64);
        type Model = LineModel;

        const MIN_SAMPLES: usize = 2;

        fn fit(&self, data: &[Self::Datum], sample: &[usize]) -> Vec<Self::Model> {
            Self::least_squares(data, sample).into_iter().collect()
        }

        fn residual(&self, model: &Self::Model, datum: &Self::Datum) -> f64 {
            let (x, y) = *datum;
            (model.slope * x - y + model.intercept).abs()
                / (model.slope * model.slope + 1.0).sqrt()
        }

        fn solve(&self, data: &[Self::Datum], indices: &[usize]) -> Option<Self::Model> {
            Self::least_squares(data, indices)
        }
    }

    fn opts() -> RansacOptions {
        RansacOptions {
            thresh: 0.05,
            seed: 42,
            ..RansacOptions::default()
        }
    }

    #[test]
    fn insufficient_data_fails() {
        let res = ransac(&LineEstimator, &[(0.0, 0.0)], &opts());
        assert!(!res.success);
        assert!(res.model.is_none());
        assert!(res.inliers.is_empty());
    }

    #[test]
    fn small_data_uses_plain_solve() {
        let data = [(0.0, 1.0), (1.0, 3.0), (2.0, 5.0)];
        let res = ransac(&LineEstimator, &data, &opts());
        assert!(res.success);
        assert_eq!(res.iters, 0);
        let model = res.model.unwrap();
        assert!((model.slope - 2.0).abs() < 1e-12);
        assert_eq!(res.inliers, vec![0, 1, 2]);
    }

    #[test]
    fn recovers_exact_inlier_set_with_thirty_percent_outliers() {
        let mut data = Vec::new();
        let mut planted = Vec::new();
        for i in 0..100 {
            let x = i as f64 * 0.1;
            if i % 10 < 7 {
                planted.push(i);
                data.push((x, 2.0 * x + 1.0));
            } else {
                // Far from the line and not collinear with each other.
                let offset = 3.0 + (i % 7) as f64;
                let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
                data.push((x, 2.0 * x + 1.0 + sign * offset));
            }
        }

        let o = opts();
        let res = ransac(&LineEstimator, &data, &o);
        assert!(res.success);
        assert_eq!(res.inliers, planted);
        assert!(res.iters <= o.max_iters);
        let model = res.model.unwrap();
        assert!((model.slope - 2.0).abs() < 1e-9);
        assert!((model.intercept - 1.0).abs() < 1e-9);
        assert!((res.eval - (70.0 - 2.0) / (100.0 - 2.0)).abs() < 1e-12);
    }

    #[test]
    fn pure_noise_is_rejected() {
        let data: Vec<(f64, f64)> = (0..40)
            .map(|i| {
                let x = i as f64;
                (x, ((37 * i * i + 11 * i) % 101) as f64 * 3.0)
            })
            .collect();
        let res = ransac(&LineEstimator, &data, &opts());
        assert!(!res.success);
        assert!(res.model.is_none());
    }

    #[test]
    fn consensus_below_minimum_inlier_count_fails() {
        // three collinear points clear min_eval, but 2 * min_rate = 4 inliers are required
        let data = [(0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (3.0, 50.0)];
        let o = RansacOptions {
            thresh: 0.1,
            ..RansacOptions::default()
        };
        let res = ransac(&LineEstimator, &data, &o);
        assert!(!res.success);
        assert!(res.model.is_none());
        assert!(res.inliers.is_empty());
        assert!((res.eval - 0.5).abs() < 1e-12);

        let relaxed = RansacOptions { min_rate: 1, ..o };
        let res = ransac(&LineEstimator, &data, &relaxed);
        assert!(res.success);
        assert_eq!(res.inliers, vec![0, 1, 2]);
    }

    #[test]
    fn adaptive_stop_shrinks_with_rate() {
        assert_eq!(adaptive_stop(1.0, 8, 0.99, 1000), 1);
        let low = adaptive_stop(0.2, 3, 0.99, 1000);
        let high = adaptive_stop(0.9, 3, 0.99, 1000);
        assert!(high < low);
        assert_eq!(adaptive_stop(0.01, 8, 0.99, 1000), 1000);
        // 1 + ln(0.01) / ln(1 - 0.5^2) = 17.0078..
        assert_eq!(adaptive_stop(0.5, 2, 0.99, 1000), 17);
    }
}
