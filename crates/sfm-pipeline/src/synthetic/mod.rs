//! Synthetic scenes with known ground truth.
//!
//! A ring of cameras looks at a random point cloud around the origin. Each
//! 3D point carries one descriptor; every view observes it with a small
//! per-view descriptor perturbation and deterministic pixel noise, plus a
//! few clutter features that match nothing.

mod noise;

pub use noise::UniformPixelNoise;

use crate::feature::{Contrast, Feature, QueueDetector};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sfm_core::{CameraModel, FxFyCxCySkew, Iso3, Pt2, Pt3, Real, Vec3};

pub const IMAGE_WIDTH: u32 = 640;
pub const IMAGE_HEIGHT: u32 = 480;

/// Parameters of [`SyntheticConfig::build`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub num_views: usize,
    /// Ring radius around the origin.
    pub radius: Real,
    /// Angular step between neighbouring cameras, radians.
    pub step: Real,
    pub num_points: usize,
    /// Points are drawn uniformly from `[-extent, extent]^3`.
    pub extent: Real,
    pub descriptor_dim: usize,
    /// Per-component descriptor perturbation amplitude between views.
    pub descriptor_noise: f32,
    /// Unmatched random features added to each view.
    pub clutter: usize,
    pub pixel_noise: Real,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            num_views: 5,
            radius: 4.0,
            step: 10.0_f64.to_radians(),
            num_points: 80,
            extent: 1.0,
            descriptor_dim: 64,
            descriptor_noise: 0.02,
            clutter: 5,
            pixel_noise: 0.5,
            seed: 42,
        }
    }
}

/// Generated scene plus its ground truth.
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    pub camera: CameraModel,
    pub points: Vec<Pt3>,
    /// `T_C_W` per view.
    pub poses: Vec<Iso3>,
    pub features: Vec<Vec<Feature>>,
    /// `point_ids[v][f]` is the 3D point behind feature `f` of view `v`, `None` for clutter.
    pub point_ids: Vec<Vec<Option<usize>>>,
    pub images: Vec<RgbImage>,
}

impl SyntheticScene {
    /// Detector that replays the generated feature lists, one per view.
    pub fn detector(&self) -> QueueDetector {
        QueueDetector::new(self.features.iter().cloned())
    }
}

pub fn synthetic_camera() -> CameraModel {
    CameraModel::pinhole(FxFyCxCySkew::new(
        500.0,
        500.0,
        Real::from(IMAGE_WIDTH) / 2.0,
        Real::from(IMAGE_HEIGHT) / 2.0,
    ))
}

/// Camera on a horizontal circle of `radius` at azimuth `theta` from `-Z`, facing the origin.
pub fn ring_pose(theta: Real, radius: Real) -> Iso3 {
    let eye = Pt3::new(radius * theta.sin(), 0.0, -radius * theta.cos());
    Iso3::face_towards(&eye, &Pt3::origin(), &Vec3::new(0.0, -1.0, 0.0)).inverse()
}

/// `n` cameras on a horizontal circle of `radius`, centred on `-Z` and all
/// facing the origin, spaced `step` radians apart.
pub fn ring_poses(n: usize, radius: Real, step: Real) -> Vec<Iso3> {
    let mid = n.saturating_sub(1) as Real / 2.0;
    (0..n)
        .map(|k| ring_pose((k as Real - mid) * step, radius))
        .collect()
}

fn gradient_image() -> RgbImage {
    RgbImage::from_fn(IMAGE_WIDTH, IMAGE_HEIGHT, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    })
}

fn random_descriptor(rng: &mut StdRng, dim: usize) -> Vec<f32> {
    (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect()
}

fn random_contrast(rng: &mut StdRng) -> Contrast {
    if rng.random_bool(0.5) {
        Contrast::Positive
    } else {
        Contrast::Negative
    }
}

impl SyntheticConfig {
    /// Ring scene of `num_views` cameras spaced `step` apart.
    pub fn build(&self) -> SyntheticScene {
        self.build_with_poses(ring_poses(self.num_views, self.radius, self.step))
    }

    /// Scene observed from the given `T_C_W` poses; `num_views`, `radius` and
    /// `step` are ignored.
    pub fn build_with_poses(&self, poses: Vec<Iso3>) -> SyntheticScene {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let camera = synthetic_camera();
        let noise = UniformPixelNoise {
            seed: self.seed,
            max_abs_px: self.pixel_noise,
        };

        let e = self.extent;
        let points: Vec<Pt3> = (0..self.num_points)
            .map(|_| {
                Pt3::new(
                    rng.random_range(-e..=e),
                    rng.random_range(-e..=e),
                    rng.random_range(-e..=e),
                )
            })
            .collect();
        let signatures: Vec<(Vec<f32>, Contrast)> = points
            .iter()
            .map(|_| {
                let d = random_descriptor(&mut rng, self.descriptor_dim);
                (d, random_contrast(&mut rng))
            })
            .collect();

        let (w, h) = (Real::from(IMAGE_WIDTH), Real::from(IMAGE_HEIGHT));
        let in_image = |px: &Pt2| px.x >= 0.0 && px.y >= 0.0 && px.x < w && px.y < h;

        let mut features = Vec::with_capacity(poses.len());
        let mut point_ids = Vec::with_capacity(poses.len());
        for (v, pose) in poses.iter().enumerate() {
            let mut feats = Vec::new();
            let mut ids = Vec::new();
            for (i, pw) in points.iter().enumerate() {
                let Some(px) = camera.project_point(&pose.transform_point(pw)) else {
                    continue;
                };
                let px = noise.apply(v, i, px);
                if !in_image(&px) {
                    continue;
                }
                let (base, contrast) = &signatures[i];
                let descriptor = base
                    .iter()
                    .map(|x| {
                        x + rng.random_range(-self.descriptor_noise..=self.descriptor_noise)
                    })
                    .collect();
                feats.push(Feature::new(px, 2.0, 0.0, *contrast, descriptor));
                ids.push(Some(i));
            }
            for _ in 0..self.clutter {
                let px = Pt2::new(rng.random_range(0.0..w), rng.random_range(0.0..h));
                let descriptor = random_descriptor(&mut rng, self.descriptor_dim);
                let contrast = random_contrast(&mut rng);
                feats.push(Feature::new(px, 2.0, 0.0, contrast, descriptor));
                ids.push(None);
            }
            features.push(feats);
            point_ids.push(ids);
        }

        SyntheticScene {
            camera,
            images: vec![gradient_image(); poses.len()],
            points,
            poses,
            features,
            point_ids,
        }
    }
}
