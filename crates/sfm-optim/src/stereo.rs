//! Two-view relative pose and the stereo quality score used for bootstrapping.

use crate::refine::{refine_stereo_pose, RefineOptions};
use crate::{ransac_outcome, refine_for};
use log::debug;
use sfm_core::{
    camera_center, ensure_correspondences, parallax_angle, ransac, CameraModel, Estimator,
    GeometryResult, Iso3, Mat3, Pt2, Pt3, RansacOptions, Real,
};
use sfm_linear::epipolar::{essential_8point, relative_pose_from_essential, sampson_distance};
use sfm_linear::triangulate_point_linear;

/// Score saturates once this many well-conditioned points are found (`2^10`).
const QUALITY_LOG2_CAP: Real = 10.0;

struct EssentialEstimator;

impl EssentialEstimator {
    fn eight_point(data: &[(Pt2, Pt2)], idx: &[usize]) -> GeometryResult<Mat3> {
        let (x0, x1): (Vec<Pt2>, Vec<Pt2>) = idx.iter().map(|&i| data[i]).unzip();
        essential_8point(&x0, &x1)
    }
}

impl Estimator for EssentialEstimator {
    type Datum = (Pt2, Pt2);
    type Model = Mat3;

    const MIN_SAMPLES: usize = 8;

    fn fit(&self, data: &[(Pt2, Pt2)], sample: &[usize]) -> Vec<Mat3> {
        Self::eight_point(data, sample).into_iter().collect()
    }

    fn residual(&self, model: &Mat3, datum: &(Pt2, Pt2)) -> Real {
        sampson_distance(model, &datum.0, &datum.1)
    }

    fn solve(&self, data: &[(Pt2, Pt2)], indices: &[usize]) -> Option<Mat3> {
        Self::eight_point(data, indices).ok()
    }
}

fn normalized_pairs(
    cam0: &CameraModel,
    pix0: &[Pt2],
    cam1: &CameraModel,
    pix1: &[Pt2],
) -> Vec<(Pt2, Pt2)> {
    pix0.iter()
        .zip(pix1)
        .map(|(p, q)| (cam0.pixel_to_normalized(p), cam1.pixel_to_normalized(q)))
        .collect()
}

fn pick<T: Copy>(values: &[T], idx: &[usize]) -> Vec<T> {
    idx.iter().map(|&i| values[i]).collect()
}

/// Relative pose `T_1_0` with unit baseline from all correspondences.
pub fn stereo_pose(
    cam0: &CameraModel,
    pix0: &[Pt2],
    cam1: &CameraModel,
    pix1: &[Pt2],
    opts: &RefineOptions,
) -> GeometryResult<Iso3> {
    ensure_correspondences(pix0.len(), pix1.len(), EssentialEstimator::MIN_SAMPLES)?;
    let data = normalized_pairs(cam0, pix0, cam1, pix1);
    let (x0, x1): (Vec<Pt2>, Vec<Pt2>) = data.into_iter().unzip();
    let e = essential_8point(&x0, &x1)?;
    let init = relative_pose_from_essential(&e, &x0, &x1)?;
    refine_stereo_pose(&init, cam0, pix0, cam1, pix1, opts)
}

/// Essential-matrix RANSAC followed by cheirality selection and refinement
/// on the consensus set. `opts.thresh` is in pixels.
///
/// Returns `T_1_0` (unit baseline) and the inlier indices.
pub fn stereo_pose_ransac(
    cam0: &CameraModel,
    pix0: &[Pt2],
    cam1: &CameraModel,
    pix1: &[Pt2],
    opts: &RansacOptions,
) -> GeometryResult<(Iso3, Vec<usize>)> {
    ensure_correspondences(pix0.len(), pix1.len(), EssentialEstimator::MIN_SAMPLES)?;
    let data = normalized_pairs(cam0, pix0, cam1, pix1);
    let focal = 0.5 * (cam0.mean_focal() + cam1.mean_focal());
    let normalized_opts = RansacOptions {
        thresh: opts.thresh / focal,
        ..*opts
    };
    let (e, inliers) = ransac_outcome(
        "essential",
        data.len(),
        ransac(&EssentialEstimator, &data, &normalized_opts),
    )?;

    let (x0, x1): (Vec<Pt2>, Vec<Pt2>) = pick(&data, &inliers).into_iter().unzip();
    let init = relative_pose_from_essential(&e, &x0, &x1)?;
    let pose = refine_stereo_pose(
        &init,
        cam0,
        &pick(pix0, &inliers),
        cam1,
        &pick(pix1, &inliers),
        &refine_for(opts),
    )
    .unwrap_or_else(|err| {
        debug!("stereo refinement failed ({err}), keeping essential pose");
        init
    });
    Ok((pose, inliers))
}

/// A solved two-view geometry with its triangulated support.
#[derive(Debug, Clone)]
pub struct StereoEstimate {
    /// Relative pose `T_1_0` with unit baseline.
    pub pose: Iso3,
    pub inliers: Vec<usize>,
    /// Inliers that triangulate in front of both cameras with enough parallax.
    pub points: Vec<(usize, Pt3)>,
    /// `min(10, log2(points.len())) / 10`, in `[0, 1]`.
    pub score: Real,
}

/// Solve a stereo pair and score how well it constrains structure.
///
/// Only inliers whose parallax angle is at least `min_angle` radians count
/// toward the score.
pub fn evaluate_stereo(
    cam0: &CameraModel,
    pix0: &[Pt2],
    cam1: &CameraModel,
    pix1: &[Pt2],
    min_angle: Real,
    opts: &RansacOptions,
) -> GeometryResult<StereoEstimate> {
    let (pose, inliers) = stereo_pose_ransac(cam0, pix0, cam1, pix1, opts)?;
    let poses = [Iso3::identity(), pose];
    let c0 = Pt3::origin();
    let c1 = camera_center(&pose);

    let points: Vec<(usize, Pt3)> = inliers
        .iter()
        .filter_map(|&i| {
            let x = [cam0.pixel_to_normalized(&pix0[i]), cam1.pixel_to_normalized(&pix1[i])];
            let p = triangulate_point_linear(&poses, &x).ok()?;
            (parallax_angle(&p, &c0, &c1) >= min_angle).then_some((i, p))
        })
        .collect();

    let score = if points.is_empty() {
        0.0
    } else {
        (points.len() as Real).log2().min(QUALITY_LOG2_CAP) / QUALITY_LOG2_CAP
    };
    Ok(StereoEstimate {
        pose,
        inliers,
        points,
        score,
    })
}

/// Stereo quality in `[0, 1]`; zero when the pair cannot be solved.
pub fn stereo_quality(
    cam0: &CameraModel,
    pix0: &[Pt2],
    cam1: &CameraModel,
    pix1: &[Pt2],
    min_angle: Real,
    opts: &RansacOptions,
) -> Real {
    match evaluate_stereo(cam0, pix0, cam1, pix1, min_angle, opts) {
        Ok(est) => est.score,
        Err(err) => {
            debug!("stereo quality: {err}");
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfm_core::{FxFyCxCySkew, GeometryError, Vec2, Vec3};

    fn camera() -> CameraModel {
        CameraModel::pinhole(FxFyCxCySkew::new(500.0, 500.0, 320.0, 240.0))
    }

    fn opts() -> RansacOptions {
        RansacOptions {
            confidence: 0.9999,
            ..RansacOptions::with_thresh(2.0)
        }
    }

    fn relative() -> Iso3 {
        Iso3::new(Vec3::new(-0.5, 0.05, 0.1), Vec3::new(0.02, 0.15, -0.03))
    }

    /// 40 non-coplanar points, every fifth second-view pixel displaced.
    fn scene() -> (Vec<Pt2>, Vec<Pt2>, Vec<usize>) {
        let cam = camera();
        let rel = relative();
        let mut pix0 = Vec::new();
        let mut pix1 = Vec::new();
        let mut inliers = Vec::new();
        for i in 0..40usize {
            let pw = Pt3::new(
                ((i * 7) % 10) as Real * 0.2 - 1.0,
                ((i * 3) % 8) as Real * 0.2 - 0.8,
                4.5 + (i % 5) as Real * 0.3,
            );
            pix0.push(cam.project_point(&pw).unwrap());
            let mut q = cam.project_point(&rel.transform_point(&pw)).unwrap();
            if i % 5 == 3 {
                q += Vec2::new(40.0, -30.0);
            } else {
                inliers.push(i);
            }
            pix1.push(q);
        }
        (pix0, pix1, inliers)
    }

    #[test]
    fn ransac_recovers_relative_pose_and_inliers() {
        let (pix0, pix1, expected) = scene();
        let cam = camera();
        let (pose, inliers) =
            stereo_pose_ransac(&cam, &pix0, &cam, &pix1, &opts()).unwrap();
        assert_eq!(inliers, expected);

        let rel = relative();
        assert!(pose.rotation.angle_to(&rel.rotation) < 1e-6);
        let t_gt = rel.translation.vector.normalize();
        assert!((pose.translation.vector - t_gt).norm() < 1e-6);
    }

    #[test]
    fn plain_solve_on_clean_data() {
        let (pix0, pix1, inliers) = scene();
        let cam = camera();
        let pose = stereo_pose(
            &cam,
            &pick(&pix0, &inliers),
            &cam,
            &pick(&pix1, &inliers),
            &RefineOptions::default(),
        )
        .unwrap();
        assert!(pose.rotation.angle_to(&relative().rotation) < 1e-6);
    }

    #[test]
    fn quality_counts_points_with_parallax() {
        let (pix0, pix1, _) = scene();
        let cam = camera();
        let opts = opts();

        let est = evaluate_stereo(&cam, &pix0, &cam, &pix1, 1f64.to_radians(), &opts).unwrap();
        assert_eq!(est.points.len(), 32);
        assert!((est.score - 0.5).abs() < 1e-12);

        let strict = stereo_quality(&cam, &pix0, &cam, &pix1, 45f64.to_radians(), &opts);
        assert_eq!(strict, 0.0);
    }

    #[test]
    fn too_few_correspondences() {
        let cam = camera();
        let pix = vec![Pt2::new(1.0, 2.0); 5];
        assert_eq!(
            stereo_pose_ransac(&cam, &pix, &cam, &pix, &RansacOptions::default()).unwrap_err(),
            GeometryError::NotEnoughData { needed: 8, got: 5 }
        );
        assert_eq!(
            stereo_quality(&cam, &pix, &cam, &pix, 0.0, &RansacOptions::default()),
            0.0
        );
    }
}
