//! Robust pose estimation: 3D-3D, 2D-3D and planar 2D-2D.
//!
//! Every entry point comes in a plain flavour (linear init + refinement on
//! all data) and a RANSAC flavour returning the pose and its inlier indices.

use crate::refine::{refine_pose_undistorted, refine_rigid_pose, RefineOptions};
use crate::{ransac_outcome, refine_for};
use sfm_core::{
    ensure_correspondences, ransac, CameraModel, Estimator, FxFyCxCySkew, GeometryError,
    GeometryResult, Iso3, Pt2, Pt3, RansacOptions, Real,
};
use sfm_linear::pnp::{dlt, p3p, select_pose};
use sfm_linear::{dlt_homography, planar_pose_from_homography, rigid_transform};

struct RigidEstimator {
    refine: RefineOptions,
}

impl RigidEstimator {
    fn split(data: &[(Pt3, Pt3)], idx: &[usize]) -> (Vec<Pt3>, Vec<Pt3>) {
        idx.iter().map(|&i| data[i]).unzip()
    }
}

impl Estimator for RigidEstimator {
    type Datum = (Pt3, Pt3);
    type Model = Iso3;

    const MIN_SAMPLES: usize = 3;

    fn fit(&self, data: &[Self::Datum], sample: &[usize]) -> Vec<Iso3> {
        let (from, to) = Self::split(data, sample);
        rigid_transform(&from, &to).into_iter().collect()
    }

    fn residual(&self, model: &Iso3, datum: &Self::Datum) -> Real {
        (datum.1 - model.transform_point(&datum.0)).norm()
    }

    fn solve(&self, data: &[Self::Datum], indices: &[usize]) -> Option<Iso3> {
        let (from, to) = Self::split(data, indices);
        let init = rigid_transform(&from, &to).ok()?;
        refine_rigid_pose(&init, &from, &to, &self.refine).ok()
    }
}

/// Rigid transform with `to ≈ pose * from`, refined over all pairs.
pub fn rigid_pose(from: &[Pt3], to: &[Pt3], opts: &RefineOptions) -> GeometryResult<Iso3> {
    let init = rigid_transform(from, to)?;
    refine_rigid_pose(&init, from, to, opts)
}

/// RANSAC rigid transform; `opts.thresh` is a 3D distance.
pub fn rigid_pose_ransac(
    from: &[Pt3],
    to: &[Pt3],
    opts: &RansacOptions,
) -> GeometryResult<(Iso3, Vec<usize>)> {
    ensure_correspondences(from.len(), to.len(), RigidEstimator::MIN_SAMPLES)?;
    let data: Vec<(Pt3, Pt3)> = from.iter().copied().zip(to.iter().copied()).collect();
    let est = RigidEstimator {
        refine: refine_for(opts),
    };
    ransac_outcome("rigid", data.len(), ransac(&est, &data, opts))
}

#[derive(Debug, Clone, Copy)]
struct PnpDatum {
    pixel: Pt2,
    normalized: Pt2,
    world: Pt3,
}

fn pnp_data(camera: &CameraModel, pixels: &[Pt2], world: &[Pt3]) -> Vec<PnpDatum> {
    pixels
        .iter()
        .zip(world)
        .map(|(px, pw)| {
            let normalized = camera.pixel_to_normalized(px);
            PnpDatum {
                pixel: camera.intrinsics.to_pixel(&normalized),
                normalized,
                world: *pw,
            }
        })
        .collect()
}

fn pnp_residual(k: &FxFyCxCySkew, pose: &Iso3, pixel: &Pt2, world: &Pt3) -> Real {
    let p_c = pose.transform_point(world);
    if p_c.z <= Real::EPSILON {
        return Real::INFINITY;
    }
    (k.to_pixel(&Pt2::new(p_c.x / p_c.z, p_c.y / p_c.z)) - pixel).norm()
}

struct PnpEstimator {
    intrinsics: FxFyCxCySkew,
    refine: RefineOptions,
}

impl PnpEstimator {
    fn refine_from(&self, pose: &Iso3, data: &[PnpDatum], idx: &[usize]) -> GeometryResult<Iso3> {
        let pixels: Vec<Pt2> = idx.iter().map(|&i| data[i].pixel).collect();
        let world: Vec<Pt3> = idx.iter().map(|&i| data[i].world).collect();
        refine_pose_undistorted(pose, &self.intrinsics, &pixels, &world, &self.refine)
    }

    fn linear(&self, data: &[PnpDatum], idx: &[usize]) -> GeometryResult<Iso3> {
        let world: Vec<Pt3> = idx.iter().map(|&i| data[i].world).collect();
        let normalized: Vec<Pt2> = idx.iter().map(|&i| data[i].normalized).collect();
        if world.len() >= 6 {
            if let Ok(pose) = dlt(&world, &normalized) {
                return Ok(pose);
            }
        }
        if world.len() < 3 {
            return Err(GeometryError::NotEnoughData {
                needed: 3,
                got: world.len(),
            });
        }
        let candidates = p3p(&world[..3], &normalized[..3])?;
        select_pose(&candidates, &world, &normalized)
            .ok_or(GeometryError::Degenerate("no P3P candidate in front of the camera"))
    }
}

impl Estimator for PnpEstimator {
    type Datum = PnpDatum;
    type Model = Iso3;

    const MIN_SAMPLES: usize = 3;

    fn fit(&self, data: &[PnpDatum], sample: &[usize]) -> Vec<Iso3> {
        let world: Vec<Pt3> = sample.iter().map(|&i| data[i].world).collect();
        let normalized: Vec<Pt2> = sample.iter().map(|&i| data[i].normalized).collect();
        p3p(&world, &normalized).unwrap_or_default()
    }

    fn residual(&self, model: &Iso3, datum: &PnpDatum) -> Real {
        pnp_residual(&self.intrinsics, model, &datum.pixel, &datum.world)
    }

    fn solve(&self, data: &[PnpDatum], indices: &[usize]) -> Option<Iso3> {
        let init = self.linear(data, indices).ok()?;
        self.refine_from(&init, data, indices).ok()
    }

    fn polish(&self, data: &[PnpDatum], indices: &[usize], model: &Iso3) -> Option<Iso3> {
        self.refine_from(model, data, indices)
            .ok()
            .or_else(|| self.solve(data, indices))
    }
}

/// Non-robust PnP: DLT (or P3P for fewer than six points) followed by refinement.
pub fn solve_pnp(
    camera: &CameraModel,
    pixels: &[Pt2],
    world: &[Pt3],
    opts: &RefineOptions,
) -> GeometryResult<Iso3> {
    ensure_correspondences(pixels.len(), world.len(), 3)?;
    let data = pnp_data(camera, pixels, world);
    let est = PnpEstimator {
        intrinsics: camera.intrinsics,
        refine: *opts,
    };
    let all: Vec<usize> = (0..data.len()).collect();
    let init = est.linear(&data, &all)?;
    est.refine_from(&init, &data, &all)
}

/// P3P + RANSAC pose of a camera observing known world points; `opts.thresh` is in pixels.
pub fn pnp_ransac(
    camera: &CameraModel,
    pixels: &[Pt2],
    world: &[Pt3],
    opts: &RansacOptions,
) -> GeometryResult<(Iso3, Vec<usize>)> {
    ensure_correspondences(pixels.len(), world.len(), PnpEstimator::MIN_SAMPLES)?;
    let data = pnp_data(camera, pixels, world);
    let est = PnpEstimator {
        intrinsics: camera.intrinsics,
        refine: refine_for(opts),
    };
    ransac_outcome("pnp", data.len(), ransac(&est, &data, opts))
}

#[derive(Debug, Clone, Copy)]
struct PlanarDatum {
    pixel: Pt2,
    normalized: Pt2,
    plane: Pt2,
}

struct PlanarEstimator {
    intrinsics: FxFyCxCySkew,
    refine: RefineOptions,
}

impl PlanarEstimator {
    fn homography_pose(data: &[PlanarDatum], idx: &[usize]) -> GeometryResult<Iso3> {
        let plane: Vec<Pt2> = idx.iter().map(|&i| data[i].plane).collect();
        let image: Vec<Pt2> = idx.iter().map(|&i| data[i].normalized).collect();
        planar_pose_from_homography(&dlt_homography(&plane, &image)?)
    }

    fn refine_from(&self, pose: &Iso3, data: &[PlanarDatum], idx: &[usize]) -> Option<Iso3> {
        let pixels: Vec<Pt2> = idx.iter().map(|&i| data[i].pixel).collect();
        let world: Vec<Pt3> = idx
            .iter()
            .map(|&i| Pt3::new(data[i].plane.x, data[i].plane.y, 0.0))
            .collect();
        refine_pose_undistorted(pose, &self.intrinsics, &pixels, &world, &self.refine).ok()
    }
}

impl Estimator for PlanarEstimator {
    type Datum = PlanarDatum;
    type Model = Iso3;

    const MIN_SAMPLES: usize = 4;

    fn fit(&self, data: &[PlanarDatum], sample: &[usize]) -> Vec<Iso3> {
        Self::homography_pose(data, sample).into_iter().collect()
    }

    fn residual(&self, model: &Iso3, datum: &PlanarDatum) -> Real {
        let world = Pt3::new(datum.plane.x, datum.plane.y, 0.0);
        pnp_residual(&self.intrinsics, model, &datum.pixel, &world)
    }

    fn solve(&self, data: &[PlanarDatum], indices: &[usize]) -> Option<Iso3> {
        let init = Self::homography_pose(data, indices).ok()?;
        self.refine_from(&init, data, indices)
    }

    fn polish(&self, data: &[PlanarDatum], indices: &[usize], model: &Iso3) -> Option<Iso3> {
        self.refine_from(model, data, indices)
    }
}

fn planar_data(camera: &CameraModel, pixels: &[Pt2], plane: &[Pt2]) -> Vec<PlanarDatum> {
    pixels
        .iter()
        .zip(plane)
        .map(|(px, pp)| {
            let normalized = camera.pixel_to_normalized(px);
            PlanarDatum {
                pixel: camera.intrinsics.to_pixel(&normalized),
                normalized,
                plane: *pp,
            }
        })
        .collect()
}

/// Pose `T_C_P` of the plane `Z = 0` from homography decomposition plus refinement.
pub fn planar_pose(
    camera: &CameraModel,
    pixels: &[Pt2],
    plane: &[Pt2],
    opts: &RefineOptions,
) -> GeometryResult<Iso3> {
    ensure_correspondences(pixels.len(), plane.len(), PlanarEstimator::MIN_SAMPLES)?;
    let data = planar_data(camera, pixels, plane);
    let all: Vec<usize> = (0..data.len()).collect();
    let est = PlanarEstimator {
        intrinsics: camera.intrinsics,
        refine: *opts,
    };
    let init = PlanarEstimator::homography_pose(&data, &all)?;
    est.refine_from(&init, &data, &all)
        .ok_or(GeometryError::NotConverged {
            iters: opts.max_iters,
        })
}

/// Homography + RANSAC planar pose; `opts.thresh` is in pixels.
pub fn planar_pose_ransac(
    camera: &CameraModel,
    pixels: &[Pt2],
    plane: &[Pt2],
    opts: &RansacOptions,
) -> GeometryResult<(Iso3, Vec<usize>)> {
    ensure_correspondences(pixels.len(), plane.len(), PlanarEstimator::MIN_SAMPLES)?;
    let data = planar_data(camera, pixels, plane);
    let est = PlanarEstimator {
        intrinsics: camera.intrinsics,
        refine: refine_for(opts),
    };
    ransac_outcome("planar", data.len(), ransac(&est, &data, opts))
}
