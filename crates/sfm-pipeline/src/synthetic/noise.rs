//! Deterministic per-observation noise for synthetic scenes.
//!
//! Samples are keyed by `(view, point)` through SplitMix64 rather than drawn
//! from a running RNG, so adding a view or a point never shifts the noise of
//! the others.

use sfm_core::{Pt2, Real, Vec2};

/// Uniform pixel noise in `[-max_abs_px, +max_abs_px]` per axis.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UniformPixelNoise {
    pub seed: u64,
    pub max_abs_px: Real,
}

impl UniformPixelNoise {
    pub fn sample(&self, view_idx: usize, point_idx: usize) -> Vec2 {
        let max_abs = self.max_abs_px.abs();
        if max_abs == 0.0 {
            return Vec2::zeros();
        }
        let key = mix_key(self.seed, view_idx, point_idx);
        let u = unit(splitmix64(key));
        let v = unit(splitmix64(key ^ 0x94D0_49BB_1331_11EB));
        Vec2::new((u - 0.5) * 2.0 * max_abs, (v - 0.5) * 2.0 * max_abs)
    }

    pub fn apply(&self, view_idx: usize, point_idx: usize, pixel: Pt2) -> Pt2 {
        pixel + self.sample(view_idx, point_idx)
    }
}

fn mix_key(seed: u64, view_idx: usize, point_idx: usize) -> u64 {
    seed ^ (view_idx as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (point_idx as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Top 53 bits as a double in `[0, 1)`.
fn unit(x: u64) -> Real {
    (x >> 11) as Real / (1u64 << 53) as Real
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_is_keyed_and_bounded() {
        let noise = UniformPixelNoise {
            seed: 7,
            max_abs_px: 0.5,
        };
        let a = noise.sample(2, 11);
        assert_eq!(a, noise.sample(2, 11));
        assert_ne!(a, noise.sample(2, 12));
        assert_ne!(a, noise.sample(3, 11));
        for p in 0..200 {
            let s = noise.sample(0, p);
            assert!(s.x.abs() <= 0.5 && s.y.abs() <= 0.5);
        }
    }

    #[test]
    fn zero_amplitude_leaves_pixels_untouched() {
        let noise = UniformPixelNoise::default();
        let px = Pt2::new(12.5, 3.0);
        assert_eq!(noise.apply(4, 9, px), px);
    }
}
