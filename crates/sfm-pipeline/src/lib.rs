//! Incremental structure-from-motion engine.
//!
//! Views enter through [`SfmEngine::add_view`]; each [`SfmEngine::update`]
//! cycle grows the match-pair graph, bootstraps a stereo pair or registers
//! one more view by PnP, seeds new map points, re-triangulates a batch of
//! existing ones, and re-solves the poses of registered views.
//!
//! Views and map points are addressed by [`ViewId`] and [`MapPointId`]
//! handles into the engine-owned [`Scene`].

mod config;
mod engine;
mod error;
mod feature;
mod graph;
mod mapping;
mod matcher;
mod registration;
mod scene;

pub mod synthetic;

pub use config::{EngineConfig, MatcherConfig};
pub use engine::SfmEngine;
pub use error::{EngineError, EngineResult};
pub use feature::{signature_of, Contrast, Feature, FeatureDetector, QueueDetector};
pub use graph::{MatchPair, PairGraph};
pub use matcher::{find_match, match_count, match_eval, match_features};
pub use scene::{MapPoint, MapPointId, Observation, PoseState, Scene, View, ViewId};
