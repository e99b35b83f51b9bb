use crate::scene::ViewId;
use sfm_core::Real;
use thiserror::Error;

/// Stage-level failures of an update cycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("need at least 2 views, have {0}")]
    TooFewViews(usize),
    #[error("no stereo pair reaches the bootstrap quality (best {best:.3})")]
    BootstrapFailed { best: Real },
    #[error("no view can be registered against the map")]
    NoRegistrationCandidate,
    #[error("unknown view {0}")]
    UnknownView(ViewId),
}

pub type EngineResult<T> = Result<T, EngineError>;
