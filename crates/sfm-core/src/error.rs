use thiserror::Error;

/// Failure modes shared by the geometric solvers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("need at least {needed} correspondences, got {got}")]
    NotEnoughData { needed: usize, got: usize },
    #[error("input slices have mismatched lengths ({0} vs {1})")]
    InconsistentInput(usize, usize),
    #[error("degenerate configuration: {0}")]
    Degenerate(&'static str),
    #[error("svd failed to converge")]
    SvdFailed,
    #[error("polynomial system has no admissible real root")]
    PolynomialSolveFailed,
    #[error("refinement diverged after {iters} iterations")]
    NotConverged { iters: usize },
    #[error("no consensus model found")]
    RansacFailed,
}

pub type GeometryResult<T> = Result<T, GeometryError>;

/// Check that two correspondence slices agree in length and hold at least `needed` items.
pub fn ensure_correspondences(a: usize, b: usize, needed: usize) -> GeometryResult<()> {
    if a != b {
        return Err(GeometryError::InconsistentInput(a, b));
    }
    if a < needed {
        return Err(GeometryError::NotEnoughData { needed, got: a });
    }
    Ok(())
}
