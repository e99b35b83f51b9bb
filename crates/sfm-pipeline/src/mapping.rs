//! Map-point lifecycle: creation from view pairs, extension into linked
//! views, and periodic re-triangulation.

use crate::engine::SfmEngine;
use crate::scene::{MapPointId, PoseState, ViewId};
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use sfm_core::{median, parallax_angle, Pt3, Real};
use sfm_optim::{triangulate_point, triangulate_point_ransac, RayObservation};

impl SfmEngine {
    /// Bind the unbound features of `a` to map points, creating new points
    /// from matches into `b` where no linked view already supports one.
    ///
    /// Both views must be valid. Returns the number of points created.
    pub(crate) fn seed_map_points(&mut self, a: ViewId, b: ViewId) -> usize {
        if !self.scene.view_at(a).is_valid() || !self.scene.view_at(b).is_valid() {
            return 0;
        }
        let Some(matches) = self.graph.get(a, b).map(|p| p.matches.clone()) else {
            return 0;
        };
        let thresh = self.config.mpnt_reproj_err;
        let (mut extended, mut created) = (0, 0);

        for (f, m) in matches.iter().enumerate() {
            if self.scene.point_of(a, f).is_some() {
                continue;
            }
            if let Some(mp) = self.linked_point(a, b, f) {
                if self.bind_checked(mp, a, f) {
                    extended += 1;
                }
                continue;
            }
            let Some(g) = *m else {
                continue;
            };
            if let Some(mp) = self.scene.point_of(b, g) {
                if self.bind_checked(mp, a, f) {
                    extended += 1;
                }
                continue;
            }

            let Some(position) = self.triangulate_pair(a, f, b, g) else {
                continue;
            };
            let mp = self.scene.add_map_point(position);
            self.scene.bind(mp, a, f);
            self.scene.bind(mp, b, g);
            created += 1;

            let others: Vec<ViewId> = self
                .scene
                .view_at(a)
                .links
                .iter()
                .copied()
                .filter(|&v| v != b && self.scene.view_at(v).is_valid())
                .collect();
            for v in others {
                let matched = self.graph.get(a, v).and_then(|p| p.matches.get(f).copied().flatten());
                if let Some(h) = matched {
                    if self.scene.point_of(v, h).is_none()
                        && self.scene.view_at(v).reprojection_error(h, &position) <= thresh
                    {
                        self.scene.bind(mp, v, h);
                    }
                }
            }
        }

        trace!("seed {a} with {b}: {created} points created, {extended} extended");
        created
    }

    /// Map point supporting the match of feature `f` in a valid linked view other than `b`.
    fn linked_point(&self, a: ViewId, b: ViewId, f: usize) -> Option<MapPointId> {
        self.scene.view_at(a).links.iter().find_map(|&v| {
            if v == b || !self.scene.view_at(v).is_valid() {
                return None;
            }
            let g = self.graph.get(a, v)?.matches.get(f).copied().flatten()?;
            self.scene.point_of(v, g)
        })
    }

    /// Bind `(view, f)` to `mp` if the point reprojects within the error gate.
    fn bind_checked(&mut self, mp: MapPointId, view: ViewId, f: usize) -> bool {
        let position = self.scene.point_at(mp).position;
        self.scene.view_at(view).reprojection_error(f, &position) <= self.config.mpnt_reproj_err
            && self.scene.bind(mp, view, f)
    }

    /// Two-view triangulation of `a.f` and `b.g`, gated on error and parallax.
    fn triangulate_pair(&self, a: ViewId, f: usize, b: ViewId, g: usize) -> Option<Pt3> {
        let (va, vb) = (self.scene.view_at(a), self.scene.view_at(b));
        let obs = [
            RayObservation::new(va.pose, &va.camera, &va.features[f].pix),
            RayObservation::new(vb.pose, &vb.camera, &vb.features[g].pix),
        ];
        let p = triangulate_point(&obs, &self.config.point_refine_options()).ok()?;

        let mean_err = obs.iter().map(|o| o.reprojection_error(&p)).sum::<Real>() / 2.0;
        if mean_err > self.config.mpnt_reproj_err {
            return None;
        }
        (parallax_angle(&p, &va.center(), &vb.center()) >= self.config.mpnt_min_angle).then_some(p)
    }

    /// Run the seeding pass over one VALID-VALID linked pair, chosen round-robin by cycle.
    pub(crate) fn seed_cycle_pair(&mut self) {
        let pairs: Vec<(ViewId, ViewId)> = self
            .graph
            .linked_pairs(&self.scene, PoseState::Valid, PoseState::Valid)
            .into_iter()
            .map(|p| (p.a, p.b))
            .collect();
        if pairs.is_empty() {
            return;
        }
        let (a, b) = pairs[self.update_count % pairs.len()];
        let created = self.seed_map_points(a, b);
        if created > 0 {
            debug!("cycle {}: {created} points seeded from {a}-{b}", self.update_count);
        }
    }

    /// Re-triangulate up to `max_mpnt_updates` map points, chosen at random,
    /// from every supporting view's current pose.
    ///
    /// A point whose new position fails the median error gate, or whose
    /// inlier views never reach the parallax gate, keeps its last position
    /// and bindings but is invalidated, so it anchors no pose until a later
    /// refresh succeeds.
    pub(crate) fn refresh_map_points(&mut self, rng: &mut StdRng) {
        let mut ids: Vec<MapPointId> = (0..self.scene.map_points().len()).map(MapPointId).collect();
        ids.shuffle(rng);
        ids.truncate(self.config.max_mpnt_updates);

        let opts = self.config.triangulation_options(self.cycle_seed());
        let thresh = self.config.mpnt_reproj_err;
        let (mut moved, mut stale) = (0usize, 0usize);
        for id in ids {
            let obs: Vec<RayObservation> = self
                .scene
                .point_at(id)
                .observations
                .iter()
                .filter_map(|o| {
                    let view = self.scene.view_at(o.view);
                    view.is_valid()
                        .then(|| RayObservation::new(view.pose, &view.camera, &view.features[o.feature].pix))
                })
                .collect();
            if obs.len() < 2 {
                continue;
            }

            let Ok((position, _)) = triangulate_point_ransac(&obs, &opts) else {
                self.scene.invalidate(id);
                stale += 1;
                continue;
            };
            let errs: Vec<Real> = obs.iter().map(|o| o.reprojection_error(&position)).collect();
            if median(&errs).map_or(true, |m| m > thresh) {
                self.scene.invalidate(id);
                stale += 1;
                continue;
            }

            let mut max_angle: Real = 0.0;
            for i in 0..obs.len() {
                for j in i + 1..obs.len() {
                    if errs[i] <= thresh && errs[j] <= thresh {
                        let angle = parallax_angle(&position, &obs[i].center(), &obs[j].center());
                        max_angle = max_angle.max(angle);
                    }
                }
            }
            if max_angle < self.config.mpnt_min_angle {
                self.scene.invalidate(id);
                stale += 1;
                continue;
            }

            self.scene.set_position(id, position);
            moved += 1;
        }
        trace!("cycle {}: {moved} points refreshed, {stale} left stale", self.update_count);
    }
}

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::engine::SfmEngine;
    use crate::feature::QueueDetector;
    use crate::scene::{MapPointId, ViewId};
    use crate::synthetic::{SyntheticConfig, SyntheticScene};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use sfm_core::Vec3;

    /// Engine over a synthetic scene with every view placed at its true pose.
    fn posed_engine(num_views: usize) -> (SfmEngine, SyntheticScene) {
        let synth = SyntheticConfig {
            num_views,
            pixel_noise: 0.0,
            ..SyntheticConfig::default()
        }
        .build();
        let mut engine = SfmEngine::new(EngineConfig::default(), Box::new(QueueDetector::default()));
        for (features, image) in synth.features.iter().zip(&synth.images) {
            engine.add_view_with_features(synth.camera, image.clone(), features.clone(), None);
        }
        engine.absorb_pending();
        engine.expand_graph(num_views, &mut StdRng::seed_from_u64(0));
        for (k, pose) in synth.poses.iter().enumerate() {
            engine.scene.set_view_pose(ViewId(k), *pose, 0);
        }
        (engine, synth)
    }

    #[test]
    fn seeding_creates_points_that_reproject() {
        let (mut engine, synth) = posed_engine(2);
        let created = engine.seed_map_points(ViewId(0), ViewId(1));
        assert!(created >= 40, "only {created} points");
        assert_eq!(engine.map_point_count(), created);

        for mp in engine.map_points() {
            assert_eq!(mp.observations.len(), 2);
            assert!(mp.err < 1e-6);
            let nearest = synth
                .points
                .iter()
                .map(|p| (p - mp.position).norm())
                .fold(f64::INFINITY, f64::min);
            assert!(nearest < 1e-6);
        }
        // a second pass over the same pair finds nothing new
        assert_eq!(engine.seed_map_points(ViewId(0), ViewId(1)), 0);
    }

    #[test]
    fn seeding_extends_points_into_linked_views() {
        let (mut engine, _) = posed_engine(3);
        engine.seed_map_points(ViewId(0), ViewId(1));
        let before = engine.map_point_count();
        engine.seed_map_points(ViewId(2), ViewId(1));
        assert!(engine.map_point_count() >= before);
        let three_views = engine
            .map_points()
            .iter()
            .filter(|mp| mp.observations.len() == 3)
            .count();
        assert!(three_views >= 30, "only {three_views} tracks span three views");
        for mp in engine.map_points() {
            for o in &mp.observations {
                assert!(engine.scene.view_at(o.view).features[o.feature].mpnt.is_some());
            }
        }
    }

    #[test]
    fn refresh_moves_perturbed_points_back() {
        let (mut engine, _) = posed_engine(3);
        engine.seed_map_points(ViewId(0), ViewId(1));
        let id = MapPointId(0);
        let truth = engine.scene.point_at(id).position;
        engine.scene.set_position(id, truth + Vec3::new(0.05, 0.0, 0.0));
        assert!(engine.scene.point_at(id).err > 1.0);

        engine.refresh_map_points(&mut StdRng::seed_from_u64(5));
        let mp = engine.scene.point_at(id);
        assert!((mp.position - truth).norm() < 1e-6);
        assert!(mp.err < 1e-6);
        assert!(mp.valid);
    }

    #[test]
    fn failed_refresh_keeps_position_but_withdraws_trust() {
        let (mut engine, _) = posed_engine(2);
        engine.seed_map_points(ViewId(0), ViewId(1));
        let id = MapPointId(0);
        let before = engine.scene.point_at(id).position;
        let o = engine
            .scene
            .point_at(id)
            .observations
            .iter()
            .find(|o| o.view == ViewId(1))
            .copied()
            .unwrap();
        // across the epipolar lines, so no position explains both pixels
        engine.scene.view_mut(ViewId(1)).features[o.feature].pix.y += 40.0;

        engine.refresh_map_points(&mut StdRng::seed_from_u64(5));
        let mp = engine.scene.point_at(id);
        assert!(!mp.valid);
        assert!(!mp.is_trusted(f64::INFINITY));
        assert_eq!(mp.position, before);
        assert_eq!(engine.scene.point_of(ViewId(1), o.feature), Some(id));
        assert!(engine.map_points().iter().skip(1).all(|mp| mp.valid));
    }
}
