//! The incremental engine and its update cycle.
//!
//! ```no_run
//! use sfm_pipeline::{EngineConfig, QueueDetector, SfmEngine};
//! # fn views() -> Vec<(sfm_core::CameraModel, image::RgbImage)> { Vec::new() }
//!
//! let mut engine = SfmEngine::new(EngineConfig::default(), Box::new(QueueDetector::default()));
//! for (camera, image) in views() {
//!     engine.add_view(camera, image, None);
//! }
//! while engine.update(1) {
//!     if engine.views().iter().all(|v| v.is_valid()) {
//!         break;
//!     }
//! }
//! ```

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::feature::{Feature, FeatureDetector};
use crate::graph::{update_pairs, MatchPair, PairGraph};
use crate::scene::{MapPoint, Scene, View, ViewId};
use image::RgbImage;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sfm_core::{rotation_angle, CameraModel, Iso3, Real};

/// Incremental structure-from-motion over a growing set of views.
///
/// Views added with [`SfmEngine::add_view`] are queued and join the scene at
/// the start of the next [`SfmEngine::update`].
pub struct SfmEngine {
    pub(crate) config: EngineConfig,
    detector: Box<dyn FeatureDetector>,
    pub(crate) scene: Scene,
    pub(crate) graph: PairGraph,
    pending: Vec<View>,
    pub(crate) update_count: usize,
}

impl std::fmt::Debug for SfmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SfmEngine")
            .field("views", &self.scene.views().len())
            .field("map_points", &self.scene.map_points().len())
            .field("pairs", &self.graph.len())
            .field("pending", &self.pending.len())
            .field("update_count", &self.update_count)
            .finish()
    }
}

impl SfmEngine {
    pub fn new(config: EngineConfig, detector: Box<dyn FeatureDetector>) -> Self {
        Self {
            config,
            detector,
            scene: Scene::default(),
            graph: PairGraph::default(),
            pending: Vec::new(),
            update_count: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Input
    // ─────────────────────────────────────────────────────────────────────────

    /// Queue a view, extracting its features with the engine's detector.
    pub fn add_view(&mut self, camera: CameraModel, image: RgbImage, hint: Option<Iso3>) {
        let features = self.detector.detect(&image);
        self.add_view_with_features(camera, image, features, hint);
    }

    /// Queue a view whose features were extracted elsewhere.
    pub fn add_view_with_features(
        &mut self,
        camera: CameraModel,
        image: RgbImage,
        features: Vec<Feature>,
        hint: Option<Iso3>,
    ) {
        debug!(
            "queued view with {} features{}",
            features.len(),
            if hint.is_some() { " and a pose hint" } else { "" }
        );
        self.pending.push(View::new(camera, image, features, hint));
    }

    /// Pin (or release) a view's pose against re-estimation.
    pub fn set_fixed(&mut self, index: usize, fixed: bool) -> EngineResult<()> {
        let id = self.view_id(index)?;
        self.scene.view_mut(id).fixed = fixed;
        Ok(())
    }

    /// Reset to an empty engine, keeping the configuration and detector.
    pub fn clear(&mut self) {
        self.scene = Scene::default();
        self.graph = PairGraph::default();
        self.pending.clear();
        self.update_count = 0;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Update cycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Run up to `iterations` update cycles.
    ///
    /// Returns `false` as soon as a cycle cannot make progress (fewer than two
    /// views, or no pair good enough to bootstrap from).
    pub fn update(&mut self, iterations: usize) -> bool {
        for _ in 0..iterations {
            if let Err(err) = self.step() {
                debug!("update {}: {err}", self.update_count);
                return false;
            }
        }
        true
    }

    fn step(&mut self) -> EngineResult<()> {
        self.absorb_pending();
        let n = self.scene.views().len();
        if n < 2 {
            return Err(EngineError::TooFewViews(n));
        }

        let mut rng = StdRng::seed_from_u64(self.cycle_seed());
        if self.scene.views().iter().any(View::is_valid) {
            self.expand_graph(1, &mut rng);
            if let Err(err) = self.register_next_view(&mut rng) {
                debug!("update {}: {err}", self.update_count);
            }
        } else {
            self.expand_graph(n, &mut rng);
            self.bootstrap()?;
        }

        self.seed_cycle_pair();
        self.refresh_map_points(&mut rng);
        self.refine_view_poses();
        self.update_count += 1;
        Ok(())
    }

    pub(crate) fn absorb_pending(&mut self) {
        for view in self.pending.drain(..) {
            self.scene.push_view(view);
        }
        self.graph.reserve_views(self.scene.views().len());
    }

    pub(crate) fn expand_graph(&mut self, iterations: usize, rng: &mut StdRng) {
        let max_angle = self.config.max_near_pose_angle;
        update_pairs(
            &mut self.scene,
            &mut self.graph,
            iterations,
            &self.config,
            rng,
            |scene, a| near_valid_view(scene, &scene.view_at(a).pose, max_angle),
        );
    }

    /// Seed of the current cycle's random stream.
    pub(crate) fn cycle_seed(&self) -> u64 {
        self.config.seed.wrapping_add(self.update_count as u64)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read access
    // ─────────────────────────────────────────────────────────────────────────

    pub fn view_count(&self) -> usize {
        self.scene.views().len()
    }

    pub fn view(&self, index: usize) -> Option<&View> {
        self.scene.views().get(index)
    }

    pub fn views(&self) -> &[View] {
        self.scene.views()
    }

    pub fn map_point_count(&self) -> usize {
        self.scene.map_points().len()
    }

    pub fn map_point(&self, index: usize) -> Option<&MapPoint> {
        self.scene.map_points().get(index)
    }

    pub fn map_points(&self) -> &[MapPoint] {
        self.scene.map_points()
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn pair_graph(&self) -> &PairGraph {
        &self.graph
    }

    /// Match pair from view `a` into view `b`, if computed.
    pub fn match_pair(&self, a: usize, b: usize) -> EngineResult<Option<&MatchPair>> {
        let (a, b) = (self.view_id(a)?, self.view_id(b)?);
        Ok(self.graph.get(a, b))
    }

    pub fn update_count(&self) -> usize {
        self.update_count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Nearest valid view by camera-centre distance whose rotation differs
    /// from `pose` by at most `max_near_pose_angle`.
    pub fn search_near_view(&self, pose: &Iso3) -> Option<&View> {
        near_valid_view(&self.scene, pose, self.config.max_near_pose_angle)
            .map(|id| self.scene.view_at(id))
    }

    /// Pose of the most recently added valid view.
    pub fn latest_pose(&self) -> Option<Iso3> {
        self.scene
            .views()
            .iter()
            .rev()
            .find(|v| v.is_valid())
            .map(|v| v.pose)
    }

    fn view_id(&self, index: usize) -> EngineResult<ViewId> {
        if index < self.scene.views().len() {
            Ok(ViewId(index))
        } else {
            Err(EngineError::UnknownView(ViewId(index)))
        }
    }
}

pub(crate) fn near_valid_view(scene: &Scene, pose: &Iso3, max_angle: Real) -> Option<ViewId> {
    let center = sfm_core::camera_center(pose);
    scene
        .view_ids()
        .filter(|&v| {
            let view = scene.view_at(v);
            view.is_valid() && rotation_angle(pose, &view.pose) <= max_angle
        })
        .map(|v| (v, (scene.view_at(v).center() - center).norm()))
        .min_by(|x, y| x.1.total_cmp(&y.1))
        .map(|(v, _)| v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::QueueDetector;
    use crate::scene::PoseState;
    use sfm_core::{FxFyCxCySkew, Vec3};

    fn engine() -> SfmEngine {
        SfmEngine::new(EngineConfig::default(), Box::new(QueueDetector::default()))
    }

    fn camera() -> CameraModel {
        CameraModel::pinhole(FxFyCxCySkew::new(100.0, 100.0, 50.0, 50.0))
    }

    #[test]
    fn too_few_views_fails_without_panicking() {
        let mut engine = engine();
        assert!(!engine.update(1));
        engine.add_view(camera(), RgbImage::new(8, 8), None);
        assert_eq!(engine.pending_count(), 1);
        assert!(!engine.update(1));
        assert_eq!(engine.view_count(), 1);
        assert_eq!(engine.update_count(), 0);
    }

    #[test]
    fn featureless_views_cannot_bootstrap() {
        let mut engine = engine();
        for _ in 0..3 {
            engine.add_view(camera(), RgbImage::new(8, 8), None);
        }
        assert!(!engine.update(1));
        assert_eq!(engine.view_count(), 3);
        assert!(engine.views().iter().all(|v| v.state == PoseState::Null));
        assert_eq!(engine.pair_graph().len(), 6);
        assert_eq!(engine.latest_pose(), None);
    }

    #[test]
    fn hint_sets_state_and_near_view_search_respects_rotation_gate() {
        let mut engine = engine();
        let hint = Iso3::new(Vec3::new(0.1, 0.0, 0.0), Vec3::zeros());
        engine.add_view(camera(), RgbImage::new(8, 8), Some(hint));
        engine.add_view(camera(), RgbImage::new(8, 8), None);
        engine.add_view(camera(), RgbImage::new(8, 8), None);
        engine.absorb_pending();
        assert_eq!(engine.views()[0].state, PoseState::Hint);

        let near = Iso3::new(Vec3::new(1.0, 0.0, 0.0), Vec3::zeros());
        let far_but_aligned = Iso3::new(Vec3::new(3.0, 0.0, 0.0), Vec3::zeros());
        engine.scene.set_view_pose(ViewId(1), far_but_aligned, 0);
        engine.scene.set_view_pose(ViewId(2), near, 0);
        let query = Iso3::identity();
        assert_eq!(engine.search_near_view(&query).map(|v| v.pose), Some(near));

        let rotated = Iso3::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0));
        engine.scene.set_view_pose(ViewId(2), rotated, 0);
        assert_eq!(
            engine.search_near_view(&query).map(|v| v.pose),
            Some(far_but_aligned)
        );
        assert_eq!(engine.latest_pose(), Some(rotated));
    }

    #[test]
    fn clear_releases_everything() {
        let mut engine = engine();
        engine.add_view(camera(), RgbImage::new(8, 8), None);
        engine.add_view(camera(), RgbImage::new(8, 8), None);
        engine.update(1);
        engine.clear();
        assert_eq!(engine.view_count(), 0);
        assert_eq!(engine.pair_graph().len(), 0);
        assert_eq!(engine.update_count(), 0);
        assert_eq!(
            engine.match_pair(0, 1).unwrap_err(),
            EngineError::UnknownView(ViewId(0))
        );
        assert!(engine.set_fixed(0, true).is_err());
    }
}
