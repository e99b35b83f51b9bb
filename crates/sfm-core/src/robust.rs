use crate::Real;

/// IRLS weight `thresh / max(thresh, r)`: 1 inside the threshold, decaying as `1/r` outside.
pub fn irls_weight(residual: Real, thresh: Real) -> Real {
    if thresh <= 0.0 {
        return 1.0;
    }
    thresh / residual.abs().max(thresh)
}

pub fn irls_weights(residuals: &[Real], thresh: Real) -> Vec<Real> {
    residuals.iter().map(|&r| irls_weight(r, thresh)).collect()
}

/// Huber cost whose IRLS weight is [`irls_weight`].
pub fn huber_cost(residual: Real, thresh: Real) -> Real {
    let r = residual.abs();
    if thresh <= 0.0 || r <= thresh {
        r * r
    } else {
        2.0 * thresh * r - thresh * thresh
    }
}

/// RANSAC score `max(0, inliers - k) / (n - k)` of a residual set for a
/// minimal sample size `k`.
pub fn ransac_eval(residuals: &[Real], k: usize, thresh: Real) -> Real {
    let n = residuals.len();
    let count = residuals.iter().filter(|&&r| r <= thresh).count();
    if n <= k {
        return if n > 0 && count == n { 1.0 } else { 0.0 };
    }
    count.saturating_sub(k) as Real / (n - k) as Real
}

/// Fraction of errors within `thresh`.
pub fn inlier_fraction(errors: &[Real], thresh: Real) -> Real {
    if errors.is_empty() {
        return 0.0;
    }
    errors.iter().filter(|&&e| e <= thresh).count() as Real / errors.len() as Real
}
