//! Brute-force descriptor matching with cross-check.

use crate::config::MatcherConfig;
use crate::feature::Feature;
use rayon::prelude::*;
use sfm_core::Real;

/// Matches with fewer query features than this score zero.
const MIN_FEATURES_FOR_EVAL: usize = 10;

/// Best candidate for `query`, or `None` if nothing passes the gates.
///
/// Candidates must share the contrast sign, lie within `max_hamming` of the
/// query signature, and correlate strictly above `min_similarity`. Ties keep
/// the first candidate.
pub fn find_match(query: &Feature, candidates: &[Feature], cfg: &MatcherConfig) -> Option<usize> {
    let mut best = None;
    let mut best_sim = cfg.min_similarity;
    for (i, cand) in candidates.iter().enumerate() {
        if cand.contrast != query.contrast || query.hamming(cand) > cfg.max_hamming {
            continue;
        }
        let sim = query.similarity(cand);
        if sim > best_sim {
            best_sim = sim;
            best = Some(i);
        }
    }
    best
}

/// For each feature of `a`, the index of its match in `b`.
///
/// Each query runs on its own rayon task and writes only its own slot.
pub fn match_features(a: &[Feature], b: &[Feature], cfg: &MatcherConfig) -> Vec<Option<usize>> {
    a.par_iter()
        .enumerate()
        .map(|(i, fa)| {
            let j = find_match(fa, b, cfg)?;
            if cfg.cross_check && find_match(&b[j], a, cfg) != Some(i) {
                return None;
            }
            Some(j)
        })
        .collect()
}

pub fn match_count(matches: &[Option<usize>]) -> usize {
    matches.iter().filter(|m| m.is_some()).count()
}

/// Match quality `count * (1 - 1 / (n - 10)) / n`, zero for `n <= 10`.
pub fn match_eval(matches: &[Option<usize>]) -> Real {
    let n = matches.len();
    if n <= MIN_FEATURES_FOR_EVAL {
        return 0.0;
    }
    let scale = 1.0 - 1.0 / (n - MIN_FEATURES_FOR_EVAL) as Real;
    match_count(matches) as Real * scale / n as Real
}
