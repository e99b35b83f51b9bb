//! Perspective-n-Point solvers.
//!
//! Inputs are world points and their **normalized** image coordinates
//! (undistorted, `K^{-1}` applied). Outputs are `T_C_W` poses.
//!
//! - [`p3p`]: minimal three-point solver, up to four candidates.
//! - [`dlt`]: linear solve over six or more points.
//! - [`select_pose`]: disambiguate candidates by reprojection error.

mod dlt;
mod p3p;

pub use dlt::dlt;
pub use p3p::p3p;

use sfm_core::{Iso3, Pt2, Pt3, Real};

/// Sum of squared normalized reprojection errors; points behind the camera count as infinite.
pub fn normalized_cost(pose: &Iso3, world: &[Pt3], normalized: &[Pt2]) -> Real {
    world
        .iter()
        .zip(normalized)
        .map(|(pw, n)| {
            let pc = pose.transform_point(pw);
            if pc.z <= Real::EPSILON {
                Real::INFINITY
            } else {
                (Pt2::new(pc.x / pc.z, pc.y / pc.z) - n).norm_squared()
            }
        })
        .sum()
}

/// Candidate with the smallest [`normalized_cost`] over the given correspondences.
pub fn select_pose(candidates: &[Iso3], world: &[Pt3], normalized: &[Pt2]) -> Option<Iso3> {
    candidates
        .iter()
        .map(|pose| (normalized_cost(pose, world, normalized), pose))
        .filter(|(cost, _)| cost.is_finite())
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, pose)| *pose)
}


#[cfg(test)]
mod tests {
    use super::test_scene::*;
    use super::*;

    #[test]
    fn select_pose_prefers_consistent_candidate() {
        let gt = ground_truth();
        let world: Vec<Pt3> = (0..6)
            .map(|i| Pt3::new(0.1 * i as f64, 0.05 * (i % 3) as f64, 0.8 + 0.07 * i as f64))
            .collect();
        let image = project(&gt, &world);
        let wrong = Iso3::translation(0.3, 0.0, 1.0);
        let best = select_pose(&[wrong, gt], &world, &image).unwrap();
        assert!((best.to_homogeneous() - gt.to_homogeneous()).norm() < 1e-12);
    }
}
