use serde::{Deserialize, Serialize};
use sfm_core::{RansacOptions, Real};
use sfm_optim::RefineOptions;

/// Descriptor matching parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Minimum descriptor correlation (dot product of unit descriptors).
    pub min_similarity: f32,
    /// Maximum Hamming distance between binary signatures before correlating.
    pub max_hamming: u32,
    /// Accept `i -> j` only if the best match of `j` is `i`.
    pub cross_check: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.9,
            max_hamming: 20,
            cross_check: true,
        }
    }
}

/// Tunables of the incremental engine. Angles are in radians, errors in pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Match quality above which a pair becomes a graph link.
    pub min_match_eval: Real,
    /// Stereo quality the bootstrap pair must reach.
    pub min_stereo_eval: Real,
    /// Minimum 2D-3D correspondences for a registration hypothesis.
    pub min_pose_points: usize,
    /// Reprojection error gate for map points.
    pub mpnt_reproj_err: Real,
    /// Minimum parallax angle for creating or refreshing a map point.
    pub mpnt_min_angle: Real,
    /// Bootstrap scores parallax against `mpnt_min_angle * bootstrap_angle_scale`.
    pub bootstrap_angle_scale: Real,
    /// Valid views re-registered per update.
    pub max_pose_updates: usize,
    /// Map points re-triangulated per update.
    pub max_mpnt_updates: usize,
    /// Rotation gate for the hint-forced near-view search.
    pub max_near_pose_angle: Real,
    /// Partners paired with the scheduled view per graph step.
    pub max_pair_partners: usize,
    /// Best-ranked (and as many random) NULL->VALID pairs tried per registration.
    pub registration_hypotheses: usize,
    pub pnp_thresh: Real,
    pub stereo_thresh: Real,
    pub triangulation_thresh: Real,
    pub matcher: MatcherConfig,
    /// Base seed; each update cycle derives its own stream from it.
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_match_eval: 0.2,
            min_stereo_eval: 0.4,
            min_pose_points: 10,
            mpnt_reproj_err: 5.0,
            mpnt_min_angle: 3.0_f64.to_radians(),
            bootstrap_angle_scale: 1.2,
            max_pose_updates: 20,
            max_mpnt_updates: 1000,
            max_near_pose_angle: 30.0_f64.to_radians(),
            max_pair_partners: 10,
            registration_hypotheses: 3,
            pnp_thresh: 4.0,
            stereo_thresh: 2.0,
            triangulation_thresh: 3.0,
            matcher: MatcherConfig::default(),
            seed: 0,
        }
    }
}

impl EngineConfig {
    fn ransac(thresh: Real, seed: u64) -> RansacOptions {
        RansacOptions {
            seed,
            ..RansacOptions::with_thresh(thresh)
        }
    }

    pub fn pnp_options(&self, seed: u64) -> RansacOptions {
        Self::ransac(self.pnp_thresh, seed)
    }

    pub fn stereo_options(&self, seed: u64) -> RansacOptions {
        Self::ransac(self.stereo_thresh, seed)
    }

    pub fn triangulation_options(&self, seed: u64) -> RansacOptions {
        Self::ransac(self.triangulation_thresh, seed)
    }

    pub fn point_refine_options(&self) -> RefineOptions {
        RefineOptions::with_thresh(self.triangulation_thresh)
    }

    /// Parallax gate used when scoring bootstrap candidates.
    pub fn bootstrap_min_angle(&self) -> Real {
        self.mpnt_min_angle * self.bootstrap_angle_scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{ "min_pose_points": 6, "matcher": { "max_hamming": 12 } }"#)
                .unwrap();
        assert_eq!(cfg.min_pose_points, 6);
        assert_eq!(cfg.matcher.max_hamming, 12);
        assert_eq!(cfg.matcher.min_similarity, 0.9);
        assert_eq!(cfg.min_stereo_eval, 0.4);
        assert!((cfg.mpnt_min_angle.to_degrees() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn ransac_options_carry_thresholds() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.pnp_options(7).thresh, 4.0);
        assert_eq!(cfg.pnp_options(7).seed, 7);
        assert_eq!(cfg.triangulation_options(0).thresh, 3.0);
        assert!((cfg.bootstrap_min_angle().to_degrees() - 3.6).abs() < 1e-9);
    }
}
