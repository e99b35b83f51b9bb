//! Robust least-squares refinement.
//!
//! Each refiner minimizes a Huber cost by iteratively reweighted least
//! squares: the IRLS weight `thresh / max(thresh, residual)` is frozen per
//! pass, every residual block is scaled by its square root, and the weighted
//! problem is handed to Levenberg-Marquardt. Poses are parameterized around
//! the pass's reference as `(t0 + v, exp(w) * R0)`.

use crate::observation::RayObservation;
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use log::trace;
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn, Matrix2x3, SMatrix, SVector, UnitQuaternion};
use serde::{Deserialize, Serialize};
use sfm_core::{
    ensure_correspondences, huber_cost, irls_weight, skew, CameraModel, FxFyCxCySkew,
    GeometryError, GeometryResult, Iso3, Mat3, Pt2, Pt3, Real, Vec3,
};

/// Depth floor used when a trial estimate pushes a point behind the camera.
const MIN_DEPTH: Real = 1e-6;

/// Options shared by all refiners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineOptions {
    /// Maximum number of reweighting passes; also bounds the solver's patience per pass.
    pub max_iters: usize,
    /// Residual magnitude beyond which observations are down-weighted.
    pub irls_thresh: Real,
    /// Stop once a pass moves the estimate by less than this.
    pub step_tol: Real,
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self {
            max_iters: 10,
            irls_thresh: 2.0,
            step_tol: 1e-12,
        }
    }
}

impl RefineOptions {
    pub fn with_thresh(irls_thresh: Real) -> Self {
        Self {
            irls_thresh,
            ..Self::default()
        }
    }
}

/// One residual block `predicted - observed` and its Jacobian over the `D` parameters.
#[derive(Debug, Clone, Copy)]
struct Block<const R: usize, const D: usize> {
    r: SVector<Real, R>,
    j: SMatrix<Real, R, D>,
    /// False when the prediction needed the depth floor.
    valid: bool,
}

/// A reweighting pass: active blocks with frozen square-root weights around `reference`.
struct WeightedPass<'a, P, F, const R: usize, const D: usize> {
    reference: P,
    x: DVector<Real>,
    active: Vec<(usize, Real)>,
    block: &'a F,
}

impl<P, F, const R: usize, const D: usize> WeightedPass<'_, P, F, R, D>
where
    F: Fn(&P, &SVector<Real, D>, usize) -> Block<R, D>,
{
    fn delta(&self) -> SVector<Real, D> {
        SVector::from_column_slice(self.x.as_slice())
    }
}

impl<P, F, const R: usize, const D: usize> LeastSquaresProblem<Real, Dyn, Dyn>
    for WeightedPass<'_, P, F, R, D>
where
    F: Fn(&P, &SVector<Real, D>, usize) -> Block<R, D>,
{
    type ResidualStorage = Owned<Real, Dyn>;
    type JacobianStorage = Owned<Real, Dyn, Dyn>;
    type ParameterStorage = Owned<Real, Dyn>;

    fn set_params(&mut self, x: &DVector<Real>) {
        self.x.clone_from(x);
    }

    fn params(&self) -> DVector<Real> {
        self.x.clone()
    }

    fn residuals(&self) -> Option<DVector<Real>> {
        let delta = self.delta();
        let mut out = DVector::zeros(self.active.len() * R);
        for (k, &(i, s)) in self.active.iter().enumerate() {
            let b = (self.block)(&self.reference, &delta, i);
            out.fixed_rows_mut::<R>(k * R).copy_from(&(b.r * s));
        }
        Some(out)
    }

    fn jacobian(&self) -> Option<DMatrix<Real>> {
        let delta = self.delta();
        let mut out = DMatrix::zeros(self.active.len() * R, D);
        for (k, &(i, s)) in self.active.iter().enumerate() {
            let b = (self.block)(&self.reference, &delta, i);
            out.fixed_view_mut::<R, D>(k * R, 0).copy_from(&(b.j * s));
        }
        Some(out)
    }
}

/// IRLS around Levenberg-Marquardt over `count` residual blocks.
///
/// `retract` applies a solved delta to the reference; `block` evaluates
/// block `i` at `reference` moved by `delta`.
fn solve_irls<P, F, const R: usize, const D: usize>(
    init: P,
    count: usize,
    opts: &RefineOptions,
    retract: impl Fn(&P, &SVector<Real, D>) -> P,
    block: F,
) -> GeometryResult<P>
where
    P: Copy,
    F: Fn(&P, &SVector<Real, D>, usize) -> Block<R, D>,
{
    let zero = SVector::<Real, D>::zeros();
    let mut current = init;
    for pass in 0..opts.max_iters.max(1) {
        let mut active = Vec::with_capacity(count);
        let mut cost = 0.0;
        for i in 0..count {
            let b = block(&current, &zero, i);
            let r = b.r.norm();
            if !b.valid {
                continue;
            }
            if !r.is_finite() {
                return Err(GeometryError::NotConverged { iters: pass });
            }
            cost += huber_cost(r, opts.irls_thresh);
            active.push((i, irls_weight(r, opts.irls_thresh).sqrt()));
        }
        if active.is_empty() {
            return Err(GeometryError::Degenerate("no usable residuals"));
        }
        if active.len() * R < D {
            return Err(GeometryError::NotEnoughData {
                needed: D.div_ceil(R),
                got: active.len(),
            });
        }

        let problem = WeightedPass {
            reference: current,
            x: DVector::zeros(D),
            active,
            block: &block,
        };
        let (problem, report) = LevenbergMarquardt::new()
            .with_patience(opts.max_iters.max(1))
            .minimize(problem);
        let step = problem.delta();
        if step.iter().any(|v| !v.is_finite()) {
            return Err(GeometryError::NotConverged { iters: pass });
        }
        trace!(
            "irls pass {pass}: robust cost {cost:.4e}, {:?} after {} evaluations",
            report.termination, report.number_of_evaluations
        );

        current = retract(&current, &step);
        if step.norm() < opts.step_tol {
            break;
        }
    }
    Ok(current)
}

/// Left Jacobian of SO(3): `exp(w + d) ≈ exp(J_l(w) d) * exp(w)`.
fn so3_left_jacobian(w: &Vec3) -> Mat3 {
    let theta = w.norm();
    let k = skew(w);
    if theta < 1e-8 {
        return Mat3::identity() + k * 0.5;
    }
    let t2 = theta * theta;
    Mat3::identity() + k * ((1.0 - theta.cos()) / t2) + k * k * ((theta - theta.sin()) / (t2 * theta))
}

fn retract_pose(pose: &Iso3, delta: &SVector<Real, 6>) -> Iso3 {
    let v = Vec3::new(delta[0], delta[1], delta[2]);
    let w = Vec3::new(delta[3], delta[4], delta[5]);
    Iso3::from_parts(
        (pose.translation.vector + v).into(),
        UnitQuaternion::from_scaled_axis(w) * pose.rotation,
    )
}

/// `x` under `pose` moved by `delta`, with `d(p) / d(delta)`.
fn transform_with_jacobian(pose: &Iso3, delta: &SVector<Real, 6>, x: &Pt3) -> (Pt3, SMatrix<Real, 3, 6>) {
    let moved = retract_pose(pose, delta);
    let rotated = moved.rotation * x.coords;
    let w = Vec3::new(delta[3], delta[4], delta[5]);
    let mut j = SMatrix::<Real, 3, 6>::zeros();
    j.fixed_view_mut::<3, 3>(0, 0).copy_from(&Mat3::identity());
    j.fixed_view_mut::<3, 3>(0, 3)
        .copy_from(&(-skew(&rotated) * so3_left_jacobian(&w)));
    (Pt3::from(rotated + moved.translation.vector), j)
}

/// Predicted undistorted pixel and its Jacobian with respect to the camera-frame point.
///
/// Points at or behind the camera are projected at [`MIN_DEPTH`] and flagged.
fn project_with_jacobian(k: &FxFyCxCySkew, p_c: &Pt3) -> (Pt2, Matrix2x3<Real>, bool) {
    let valid = p_c.z > Real::EPSILON;
    let z = p_c.z.max(MIN_DEPTH);
    let iz = 1.0 / z;
    let n = Pt2::new(p_c.x * iz, p_c.y * iz);
    let dn = Matrix2x3::new(iz, 0.0, -n.x * iz, 0.0, iz, -n.y * iz);
    (k.to_pixel(&n), k.pixel_jacobian() * dn, valid)
}

/// Refine a rigid transform so that `to ≈ pose * from`.
pub fn refine_rigid_pose(
    pose: &Iso3,
    from: &[Pt3],
    to: &[Pt3],
    opts: &RefineOptions,
) -> GeometryResult<Iso3> {
    ensure_correspondences(from.len(), to.len(), 3)?;
    solve_irls(*pose, from.len(), opts, retract_pose, |pose, delta, i| {
        let (p, j) = transform_with_jacobian(pose, delta, &from[i]);
        Block {
            r: p - to[i],
            j,
            valid: true,
        }
    })
}

/// Refine a `T_C_W` pose against undistorted pixels.
pub(crate) fn refine_pose_undistorted(
    pose: &Iso3,
    k: &FxFyCxCySkew,
    pixels: &[Pt2],
    world: &[Pt3],
    opts: &RefineOptions,
) -> GeometryResult<Iso3> {
    ensure_correspondences(pixels.len(), world.len(), 3)?;
    solve_irls(*pose, world.len(), opts, retract_pose, |pose, delta, i| {
        let (p_c, jt) = transform_with_jacobian(pose, delta, &world[i]);
        let (proj, jp, valid) = project_with_jacobian(k, &p_c);
        Block {
            r: proj - pixels[i],
            j: jp * jt,
            valid,
        }
    })
}

/// Refine a `T_C_W` pose from observed (distorted) pixels of known world points.
pub fn refine_pnp_pose(
    pose: &Iso3,
    camera: &CameraModel,
    pixels: &[Pt2],
    world: &[Pt3],
    opts: &RefineOptions,
) -> GeometryResult<Iso3> {
    let undistorted: Vec<Pt2> = pixels.iter().map(|p| camera.undistort_pixel(p)).collect();
    refine_pose_undistorted(pose, &camera.intrinsics, &undistorted, world, opts)
}

/// Refine the pose `T_C_P` of the plane `Z = 0`.
pub fn refine_planar_pose(
    pose: &Iso3,
    camera: &CameraModel,
    pixels: &[Pt2],
    plane: &[Pt2],
    opts: &RefineOptions,
) -> GeometryResult<Iso3> {
    let world: Vec<Pt3> = plane.iter().map(|p| Pt3::new(p.x, p.y, 0.0)).collect();
    refine_pnp_pose(pose, camera, pixels, &world, opts)
}

/// Refine a relative pose `T_1_0` with unit-length translation.
///
/// Alternates linear triangulation in the current geometry with one
/// reweighting pass on the second view, re-normalizing the baseline.
pub fn refine_stereo_pose(
    pose: &Iso3,
    cam0: &CameraModel,
    pix0: &[Pt2],
    cam1: &CameraModel,
    pix1: &[Pt2],
    opts: &RefineOptions,
) -> GeometryResult<Iso3> {
    ensure_correspondences(pix0.len(), pix1.len(), 5)?;
    let obs0: Vec<RayObservation> = pix0
        .iter()
        .map(|p| RayObservation::new(Iso3::identity(), cam0, p))
        .collect();
    let undist1: Vec<Pt2> = pix1.iter().map(|p| cam1.undistort_pixel(p)).collect();
    let norm1: Vec<Pt2> = pix1.iter().map(|p| cam1.pixel_to_normalized(p)).collect();
    let step = RefineOptions { max_iters: 1, ..*opts };

    let mut current = unit_baseline(pose)?;
    for _ in 0..opts.max_iters {
        let mut pixels = Vec::with_capacity(pix0.len());
        let mut world = Vec::with_capacity(pix0.len());
        for ((o0, n1), u1) in obs0.iter().zip(&norm1).zip(&undist1) {
            let poses = [Iso3::identity(), current];
            if let Ok(p) = sfm_linear::triangulate_point_linear(&poses, &[o0.normalized, *n1]) {
                world.push(p);
                pixels.push(*u1);
            }
        }
        if world.len() < 5 {
            return Err(GeometryError::NotEnoughData {
                needed: 5,
                got: world.len(),
            });
        }

        let next = unit_baseline(&refine_pose_undistorted(
            &current,
            &cam1.intrinsics,
            &pixels,
            &world,
            &step,
        )?)?;
        let moved = (next.to_homogeneous() - current.to_homogeneous()).norm();
        current = next;
        if moved < opts.step_tol.max(1e-12) {
            break;
        }
    }
    Ok(current)
}

fn unit_baseline(pose: &Iso3) -> GeometryResult<Iso3> {
    let t = pose.translation.vector;
    let norm = t.norm();
    if norm <= Real::EPSILON {
        return Err(GeometryError::Degenerate("zero baseline"));
    }
    Ok(Iso3::from_parts((t / norm).into(), pose.rotation))
}

/// Refine a world point against its observations.
pub fn refine_point(
    point: &Pt3,
    observations: &[RayObservation],
    opts: &RefineOptions,
) -> GeometryResult<Pt3> {
    if observations.len() < 2 {
        return Err(GeometryError::NotEnoughData {
            needed: 2,
            got: observations.len(),
        });
    }
    solve_irls(
        *point,
        observations.len(),
        opts,
        |p, d: &SVector<Real, 3>| p + d,
        |p, d, i| {
            let obs = &observations[i];
            let p_c = obs.pose.transform_point(&(p + d));
            let (proj, jp, valid) = project_with_jacobian(&obs.intrinsics, &p_c);
            Block {
                r: proj - obs.pixel,
                j: jp * obs.pose.rotation.to_rotation_matrix().matrix(),
                valid,
            }
        },
    )
}
