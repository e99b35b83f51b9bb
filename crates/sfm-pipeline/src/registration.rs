//! Bootstrap from a stereo pair, PnP registration of new views, and pose
//! re-estimation of registered ones.

use crate::engine::SfmEngine;
use crate::error::{EngineError, EngineResult};
use crate::scene::{MapPointId, PoseState, ViewId};
use log::{debug, info, trace};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use sfm_core::{inlier_fraction, Iso3, Pt2, Pt3, Real};
use sfm_optim::{evaluate_stereo, pnp_ransac, StereoEstimate};

impl SfmEngine {
    /// Pixels of the features of `a` matched into `b`, as parallel slices.
    pub(crate) fn matched_pixels(&self, a: ViewId, b: ViewId) -> (Vec<Pt2>, Vec<Pt2>) {
        let Some(pair) = self.graph.get(a, b) else {
            return (Vec::new(), Vec::new());
        };
        let (va, vb) = (self.scene.view_at(a), self.scene.view_at(b));
        pair.matches
            .iter()
            .enumerate()
            .filter_map(|(f, m)| m.map(|g| (va.features[f].pix, vb.features[g].pix)))
            .unzip()
    }

    /// Features of `a` whose match in `b` supports a map point with error at most `max_err`.
    fn anchored_features(&self, a: ViewId, b: ViewId, max_err: Real) -> Vec<(usize, MapPointId)> {
        let Some(pair) = self.graph.get(b, a) else {
            return Vec::new();
        };
        pair.matches
            .iter()
            .enumerate()
            .filter_map(|(g, m)| {
                let f = (*m)?;
                let mp = self.scene.point_of(b, g)?;
                self.scene.point_at(mp).is_trusted(max_err).then_some((f, mp))
            })
            .collect()
    }

    /// Anchor the best-scoring unposed pair: its first view at the origin,
    /// the second at the relative pose with unit baseline.
    pub(crate) fn bootstrap(&mut self) -> EngineResult<()> {
        let opts = self.config.stereo_options(self.cycle_seed());
        let min_angle = self.config.bootstrap_min_angle();

        let mut candidates = Vec::new();
        for a in self.scene.view_ids() {
            let va = self.scene.view_at(a);
            if va.is_valid() {
                continue;
            }
            for &b in &va.links {
                if b > a && !self.scene.view_at(b).is_valid() {
                    candidates.push((a, b));
                }
            }
        }

        let mut best: Option<(ViewId, ViewId, StereoEstimate)> = None;
        let mut best_score = 0.0;
        for (a, b) in candidates {
            let (pix_a, pix_b) = self.matched_pixels(a, b);
            let (cam_a, cam_b) = (&self.scene.view_at(a).camera, &self.scene.view_at(b).camera);
            match evaluate_stereo(cam_a, &pix_a, cam_b, &pix_b, min_angle, &opts) {
                Ok(est) => {
                    debug!("bootstrap {a}-{b}: quality {:.3}", est.score);
                    if est.score > best_score {
                        best_score = est.score;
                        best = Some((a, b, est));
                    }
                }
                Err(err) => debug!("bootstrap {a}-{b}: {err}"),
            }
        }

        let Some((a, b, est)) = best.filter(|_| best_score >= self.config.min_stereo_eval) else {
            return Err(EngineError::BootstrapFailed { best: best_score });
        };
        let cycle = self.update_count;
        self.scene.set_view_pose(a, Iso3::identity(), cycle);
        self.scene.view_mut(a).fixed = true;
        self.scene.set_view_pose(b, est.pose, cycle);
        info!(
            "bootstrap: {a} anchored, {b} registered ({} points with parallax, quality {:.3})",
            est.points.len(),
            est.score
        );
        Ok(())
    }

    /// Register one unposed view against the map.
    ///
    /// Hypotheses are the best-ranked NULL->VALID pairs, as many more drawn at
    /// random from the rest, and every HINT->VALID pair. The hypothesis whose
    /// PnP pose explains the largest share of its anchored points wins.
    pub(crate) fn register_next_view(&mut self, rng: &mut StdRng) -> EngineResult<ViewId> {
        let k = self.config.registration_hypotheses;
        let mut ranked: Vec<(ViewId, ViewId, Real)> = self
            .graph
            .linked_pairs(&self.scene, PoseState::Null, PoseState::Valid)
            .into_iter()
            .map(|p| (p.a, p.b, p.eval))
            .collect();
        ranked.sort_by(|x, y| y.2.total_cmp(&x.2));

        let mut hypotheses: Vec<(ViewId, ViewId)> =
            ranked.iter().take(k).map(|&(a, b, _)| (a, b)).collect();
        if ranked.len() > k {
            let mut rest = ranked[k..].to_vec();
            rest.shuffle(rng);
            hypotheses.extend(rest.iter().take(k).map(|&(a, b, _)| (a, b)));
        }
        hypotheses.extend(
            self.graph
                .linked_pairs(&self.scene, PoseState::Hint, PoseState::Valid)
                .into_iter()
                .map(|p| (p.a, p.b)),
        );
        if hypotheses.is_empty() {
            return Err(EngineError::NoRegistrationCandidate);
        }

        let thresh = self.config.mpnt_reproj_err;
        let opts = self.config.pnp_options(self.cycle_seed());
        let mut best: Option<(ViewId, ViewId, Iso3)> = None;
        let mut best_eval = 0.0;
        for (a, b) in hypotheses {
            let anchored = self.anchored_features(a, b, thresh);
            if anchored.len() < self.config.min_pose_points {
                trace!("register {a} via {b}: only {} anchored points", anchored.len());
                continue;
            }
            let view = self.scene.view_at(a);
            let (pixels, world): (Vec<Pt2>, Vec<Pt3>) = anchored
                .iter()
                .map(|&(f, mp)| (view.features[f].pix, self.scene.point_at(mp).position))
                .unzip();

            let pose = match pnp_ransac(&view.camera, &pixels, &world, &opts) {
                Ok((pose, _)) => pose,
                Err(err) => {
                    debug!("register {a} via {b}: {err}");
                    continue;
                }
            };
            let errs: Vec<Real> = pixels
                .iter()
                .zip(&world)
                .map(|(px, pw)| view.camera.reprojection_error(&pose, px, pw))
                .collect();
            let eval = inlier_fraction(&errs, thresh);
            trace!("register {a} via {b}: eval {eval:.3} over {} points", pixels.len());
            if eval > best_eval {
                best_eval = eval;
                best = Some((a, b, pose));
            }
        }

        let Some((a, b, pose)) = best else {
            return Err(EngineError::NoRegistrationCandidate);
        };
        self.scene.set_view_pose(a, pose, self.update_count);

        let mut bound = 0;
        for (f, mp) in self.anchored_features(a, b, Real::INFINITY) {
            let position = self.scene.point_at(mp).position;
            if self.scene.view_at(a).reprojection_error(f, &position) <= thresh
                && self.scene.bind(mp, a, f)
            {
                bound += 1;
            }
        }
        info!("registered {a} via {b}: eval {best_eval:.3}, {bound} points bound");

        self.seed_map_points(a, b);
        Ok(a)
    }

    /// Re-solve the pose of up to `max_pose_updates` registered, non-fixed
    /// views against their bound map points, least recently updated first.
    pub(crate) fn refine_view_poses(&mut self) {
        let mut ids: Vec<ViewId> = self
            .scene
            .view_ids()
            .filter(|&v| {
                let view = self.scene.view_at(v);
                view.is_valid() && !view.fixed
            })
            .collect();
        ids.sort_by_key(|&v| (self.scene.view_at(v).last_update, v));
        ids.truncate(self.config.max_pose_updates);

        let cycle = self.update_count;
        let opts = self.config.pnp_options(self.cycle_seed());
        for v in ids {
            let view = self.scene.view_at(v);
            let (pixels, world): (Vec<Pt2>, Vec<Pt3>) = view
                .features
                .iter()
                .filter_map(|f| {
                    let mp = self.scene.point_at(f.mpnt?);
                    mp.valid.then_some((f.pix, mp.position))
                })
                .unzip();
            if pixels.len() < self.config.min_pose_points {
                self.scene.view_mut(v).last_update = cycle;
                continue;
            }

            match pnp_ransac(&view.camera, &pixels, &world, &opts) {
                Ok((pose, inliers)) => {
                    trace!("pose {v}: {}/{} inliers", inliers.len(), pixels.len());
                    self.scene.set_view_pose(v, pose, cycle);
                    self.scene.refresh_view_points(v);
                }
                Err(err) => {
                    debug!("pose {v}: {err}, keeping previous estimate");
                    self.scene.view_mut(v).last_update = cycle;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::engine::SfmEngine;
    use crate::error::EngineError;
    use crate::feature::QueueDetector;
    use crate::scene::{PoseState, ViewId};
    use crate::synthetic::SyntheticConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use sfm_core::{rotation_angle, Iso3};

    fn engine(num_views: usize, pixel_noise: f64) -> SfmEngine {
        let synth = SyntheticConfig {
            num_views,
            pixel_noise,
            ..SyntheticConfig::default()
        }
        .build();
        let mut engine = SfmEngine::new(EngineConfig::default(), Box::new(QueueDetector::default()));
        for (features, image) in synth.features.iter().zip(&synth.images) {
            engine.add_view_with_features(synth.camera, image.clone(), features.clone(), None);
        }
        engine.absorb_pending();
        engine.expand_graph(num_views, &mut StdRng::seed_from_u64(0));
        engine
    }

    #[test]
    fn bootstrap_anchors_lower_view_with_unit_baseline() {
        let mut engine = engine(2, 0.0);
        let (pa, pb) = engine.matched_pixels(ViewId(0), ViewId(1));
        assert_eq!(pa.len(), pb.len());
        assert!(pa.len() >= 70);

        engine.bootstrap().unwrap();
        let (a, b) = (engine.scene.view_at(ViewId(0)), engine.scene.view_at(ViewId(1)));
        assert!(a.is_valid() && b.is_valid());
        assert!(a.fixed && !b.fixed);
        assert_eq!(a.pose, Iso3::identity());
        assert!((b.pose.translation.vector.norm() - 1.0).abs() < 1e-9);
        assert!((rotation_angle(&a.pose, &b.pose).to_degrees() - 10.0).abs() < 1e-3);
    }

    #[test]
    fn bootstrap_rejects_low_quality() {
        let mut engine = engine(2, 0.0);
        engine.config.min_stereo_eval = 0.99;
        match engine.bootstrap() {
            Err(EngineError::BootstrapFailed { best }) => assert!(best > 0.4 && best < 0.99),
            other => panic!("unexpected {other:?}"),
        }
        assert!(engine.views().iter().all(|v| v.state == PoseState::Null));
    }

    /// Bootstrap and seed the map; returns the view left unregistered.
    fn bootstrapped(engine: &mut SfmEngine) -> ViewId {
        engine.bootstrap().unwrap();
        let valid: Vec<ViewId> = engine
            .scene
            .view_ids()
            .filter(|&v| engine.scene.view_at(v).is_valid())
            .collect();
        assert_eq!(valid.len(), 2);
        engine.seed_map_points(valid[0], valid[1]);
        engine
            .scene
            .view_ids()
            .find(|&v| !engine.scene.view_at(v).is_valid())
            .unwrap()
    }

    #[test]
    fn registration_poses_the_next_view_against_the_map() {
        let mut engine = engine(3, 0.0);
        let pending = bootstrapped(&mut engine);
        assert!(engine.map_point_count() >= 40);

        let registered = engine
            .register_next_view(&mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(registered, pending);
        let view = engine.scene.view_at(registered);
        assert!(view.is_valid());
        assert!(view.mpnt_count >= 40);
        for f in view.features.iter().filter(|f| f.mpnt.is_some()) {
            let mp = engine.scene.point_at(f.mpnt.unwrap());
            let err = view.camera.reprojection_error(&view.pose, &f.pix, &mp.position);
            assert!(err < 1e-4);
        }

        // nothing left to register
        assert_eq!(
            engine.register_next_view(&mut StdRng::seed_from_u64(1)),
            Err(EngineError::NoRegistrationCandidate)
        );
    }

    #[test]
    fn re_solving_converged_poses_is_idempotent() {
        let mut engine = engine(3, 0.0);
        bootstrapped(&mut engine);
        engine
            .register_next_view(&mut StdRng::seed_from_u64(1))
            .unwrap();

        engine.refine_view_poses();
        let first: Vec<Iso3> = engine.views().iter().map(|v| v.pose).collect();
        engine.update_count += 1;
        engine.refine_view_poses();
        for (v, before) in engine.views().iter().zip(&first) {
            assert!(rotation_angle(&v.pose, before) < 1e-6);
            assert!((v.pose.translation.vector - before.translation.vector).norm() < 1e-6);
        }
        assert_eq!(engine.views()[2].last_update, 1);
    }
}
