//! The match-pair graph: directed correspondence results indexed by view pair.

use crate::config::EngineConfig;
use crate::matcher::{match_eval, match_features};
use crate::scene::{PoseState, Scene, ViewId};
use log::trace;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use sfm_core::Real;

/// Correspondences from the features of view `a` (query) into view `b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchPair {
    pub a: ViewId,
    pub b: ViewId,
    /// `matches[f]` is the feature of `b` matched to feature `f` of `a`.
    pub matches: Vec<Option<usize>>,
    pub eval: Real,
}

/// Pool of match pairs plus a square index `(a, b) -> pair` that grows with
/// the view count. Pairs are computed once and never replaced.
#[derive(Debug, Clone, Default)]
pub struct PairGraph {
    index: Vec<Vec<Option<usize>>>,
    pairs: Vec<MatchPair>,
}

impl PairGraph {
    /// Grow the index to hold at least `n` views, keeping existing entries.
    pub fn reserve_views(&mut self, n: usize) {
        if n <= self.index.len() {
            return;
        }
        let size = (2 * n).max(4);
        for row in &mut self.index {
            row.resize(size, None);
        }
        self.index.resize(size, vec![None; size]);
    }

    pub fn get(&self, a: ViewId, b: ViewId) -> Option<&MatchPair> {
        let slot = (*self.index.get(a.0)?.get(b.0)?)?;
        self.pairs.get(slot)
    }

    pub fn contains(&self, a: ViewId, b: ViewId) -> bool {
        self.get(a, b).is_some()
    }

    pub fn pairs(&self) -> &[MatchPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    fn insert(&mut self, pair: MatchPair) {
        let (a, b) = (pair.a.0, pair.b.0);
        self.reserve_views(a.max(b) + 1);
        self.index[a][b] = Some(self.pairs.len());
        self.pairs.push(pair);
    }

    /// Linked pairs `(a, b)` with `a` in `state_a` and `b` in `state_b`.
    ///
    /// When both states are equal each unordered pair is reported once, with `a < b`.
    pub fn linked_pairs(
        &self,
        scene: &Scene,
        state_a: PoseState,
        state_b: PoseState,
    ) -> Vec<&MatchPair> {
        let mut out = Vec::new();
        for a in scene.view_ids() {
            let va = scene.view_at(a);
            if va.state != state_a {
                continue;
            }
            for &b in &va.links {
                if scene.view_at(b).state != state_b || (state_a == state_b && b < a) {
                    continue;
                }
                if let Some(pair) = self.get(a, b) {
                    out.push(pair);
                }
            }
        }
        out
    }
}

/// Match `a` against `b` and record the directed pair.
pub(crate) fn init_pair(
    scene: &mut Scene,
    graph: &mut PairGraph,
    a: ViewId,
    b: ViewId,
    cfg: &EngineConfig,
) {
    let matches = match_features(
        &scene.view_at(a).features,
        &scene.view_at(b).features,
        &cfg.matcher,
    );
    let eval = match_eval(&matches);
    trace!("pair {a} -> {b}: eval {eval:.3}");

    let va = scene.view_mut(a);
    if eval > cfg.min_match_eval {
        va.links.push(b);
    }
    va.pair_count += 1;
    graph.insert(MatchPair { a, b, matches, eval });
}

/// Run up to `iterations` graph expansion steps.
///
/// Each step picks the view with the fewest computed pairs, matches it in
/// both directions against up to `max_pair_partners` unpaired views chosen at
/// random, and, once the map holds points, force-pairs a hinted view with its
/// nearest valid view given by `near_view`. Returns `false` once every view
/// is paired with every other.
pub(crate) fn update_pairs(
    scene: &mut Scene,
    graph: &mut PairGraph,
    iterations: usize,
    cfg: &EngineConfig,
    rng: &mut StdRng,
    near_view: impl Fn(&Scene, ViewId) -> Option<ViewId>,
) -> bool {
    let n = scene.views().len();
    graph.reserve_views(n);

    for _ in 0..iterations {
        let Some(a) = scene
            .view_ids()
            .filter(|&v| scene.view_at(v).pair_count < n.saturating_sub(1))
            .min_by_key(|&v| scene.view_at(v).pair_count)
        else {
            return false;
        };

        let mut partners: Vec<ViewId> = scene
            .view_ids()
            .filter(|&b| b != a && !graph.contains(a, b))
            .collect();
        if partners.is_empty() {
            return false;
        }
        partners.shuffle(rng);
        for &b in partners.iter().take(cfg.max_pair_partners) {
            init_pair(scene, graph, a, b, cfg);
            init_pair(scene, graph, b, a, cfg);
        }

        if scene.view_at(a).state == PoseState::Hint && !scene.map_points().is_empty() {
            if let Some(v) = near_view(scene, a) {
                if v != a && !graph.contains(a, v) {
                    init_pair(scene, graph, a, v, cfg);
                    init_pair(scene, graph, v, a, cfg);
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{Contrast, Feature};
    use crate::scene::View;
    use image::RgbImage;
    use rand::SeedableRng;
    use sfm_core::{CameraModel, FxFyCxCySkew, Pt2};

    fn features(ids: &[usize]) -> Vec<Feature> {
        ids.iter()
            .map(|&i| {
                let mut d = vec![0.05; 32];
                d[i % 32] = 1.0;
                Feature::new(Pt2::new(i as f64, 0.0), 1.0, 0.0, Contrast::Positive, d)
            })
            .collect()
    }

    fn scene(n_views: usize) -> Scene {
        let cam = CameraModel::pinhole(FxFyCxCySkew::new(100.0, 100.0, 50.0, 50.0));
        let mut scene = Scene::default();
        for v in 0..n_views {
            // views share 20 features; view 3 shares only 12 of them
            let ids: Vec<usize> = if v == 3 { (0..12).collect() } else { (0..20).collect() };
            scene.push_view(View::new(cam, RgbImage::new(1, 1), features(&ids), None));
        }
        scene
    }

    #[test]
    fn pairs_are_symmetric_and_cross_checked() {
        let mut scene = scene(4);
        let mut graph = PairGraph::default();
        let mut rng = StdRng::seed_from_u64(1);
        let cfg = EngineConfig::default();
        // three steps pair everything; the fourth finds nothing left
        assert!(!update_pairs(&mut scene, &mut graph, 10, &cfg, &mut rng, |_, _| None));

        assert_eq!(graph.len(), 12);
        for pair in graph.pairs() {
            let back = graph.get(pair.b, pair.a).expect("reverse pair");
            for (f, m) in pair.matches.iter().enumerate() {
                if let Some(g) = *m {
                    assert_eq!(back.matches[g], Some(f));
                }
            }
        }
        for v in scene.view_ids() {
            assert_eq!(scene.view_at(v).pair_count, 3);
        }
        assert!(!update_pairs(&mut scene, &mut graph, 1, &cfg, &mut rng, |_, _| None));
    }

    #[test]
    fn weak_pairs_are_recorded_but_not_linked() {
        let mut scene = scene(4);
        let mut graph = PairGraph::default();
        let mut rng = StdRng::seed_from_u64(3);
        let cfg = EngineConfig {
            min_match_eval: 0.7,
            ..EngineConfig::default()
        };
        update_pairs(&mut scene, &mut graph, 10, &cfg, &mut rng, |_, _| None);

        // 12 of 20 matched: 12 * (1 - 1/10) / 20 = 0.54
        let weak = graph.get(ViewId(0), ViewId(3)).unwrap();
        assert!((weak.eval - 0.54).abs() < 1e-12);
        assert!(!scene.view_at(ViewId(0)).links.contains(&ViewId(3)));
        assert!(scene.view_at(ViewId(0)).links.contains(&ViewId(1)));
        // view 3 has 12 features, all matched: 12 * (1 - 1/2) / 12 = 0.5
        assert!(scene.view_at(ViewId(3)).links.is_empty());
    }

    #[test]
    fn index_grows_without_losing_pairs() {
        let mut scene = scene(2);
        let mut graph = PairGraph::default();
        let cfg = EngineConfig::default();
        init_pair(&mut scene, &mut graph, ViewId(0), ViewId(1), &cfg);
        graph.reserve_views(40);
        assert!(graph.contains(ViewId(0), ViewId(1)));
        assert!(!graph.contains(ViewId(1), ViewId(0)));
        assert!(graph.get(ViewId(39), ViewId(0)).is_none());
        assert!(graph.get(ViewId(500), ViewId(0)).is_none());
    }

    #[test]
    fn hinted_view_is_force_paired_only_once_the_map_has_points() {
        let mut scene = scene(3);
        scene.view_mut(ViewId(0)).state = PoseState::Hint;
        scene.view_mut(ViewId(2)).state = PoseState::Valid;
        let mut graph = PairGraph::default();
        let mut rng = StdRng::seed_from_u64(5);
        let cfg = EngineConfig {
            max_pair_partners: 0,
            ..EngineConfig::default()
        };
        let nearest = |_: &Scene, _: ViewId| Some(ViewId(2));

        assert!(update_pairs(&mut scene, &mut graph, 1, &cfg, &mut rng, nearest));
        assert!(graph.is_empty());

        scene.add_map_point(sfm_core::Pt3::origin());
        assert!(update_pairs(&mut scene, &mut graph, 1, &cfg, &mut rng, nearest));
        assert_eq!(graph.len(), 2);
        assert!(graph.contains(ViewId(0), ViewId(2)));
        assert!(graph.contains(ViewId(2), ViewId(0)));
    }

    #[test]
    fn linked_pairs_filter_by_state() {
        let mut scene = scene(3);
        let mut graph = PairGraph::default();
        let mut rng = StdRng::seed_from_u64(0);
        let cfg = EngineConfig::default();
        update_pairs(&mut scene, &mut graph, 10, &cfg, &mut rng, |_, _| None);
        scene.view_mut(ViewId(1)).state = PoseState::Valid;
        scene.view_mut(ViewId(2)).state = PoseState::Valid;

        let null_valid = graph.linked_pairs(&scene, PoseState::Null, PoseState::Valid);
        assert_eq!(null_valid.len(), 2);
        assert!(null_valid.iter().all(|p| p.a == ViewId(0)));

        let valid_valid = graph.linked_pairs(&scene, PoseState::Valid, PoseState::Valid);
        assert_eq!(valid_valid.len(), 1);
        assert_eq!((valid_valid[0].a, valid_valid[0].b), (ViewId(1), ViewId(2)));
    }
}
