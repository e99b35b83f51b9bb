//! Shared numerics for the linear solvers: Hartley normalization, polynomial
//! roots and SVD null-space extraction.

use nalgebra::{DMatrix, DVector, Matrix3x4, Schur};
use sfm_core::{GeometryError, GeometryResult, Mat3, Mat4, Pt2, Pt3, Real};

/// Hartley normalization for 2D points.
///
/// Returns the centred, scaled points (mean distance `sqrt(2)`) and the
/// transform `T` with `p_norm = T * p_h`. `None` when all points coincide.
pub fn normalize_points_2d(points: &[Pt2]) -> Option<(Vec<Pt2>, Mat3)> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as Real;
    let c = points.iter().fold(Pt2::origin().coords, |acc, p| acc + p.coords) / n;
    let mean_dist = points.iter().map(|p| (p.coords - c).norm()).sum::<Real>() / n;
    if mean_dist <= Real::EPSILON {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Mat3::new(s, 0.0, -s * c.x, 0.0, s, -s * c.y, 0.0, 0.0, 1.0);
    let norm = points.iter().map(|p| Pt2::from((p.coords - c) * s)).collect();
    Some((norm, t))
}

/// Hartley normalization for 3D points (mean distance `sqrt(3)`).
pub fn normalize_points_3d(points: &[Pt3]) -> Option<(Vec<Pt3>, Mat4)> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as Real;
    let c = points.iter().fold(Pt3::origin().coords, |acc, p| acc + p.coords) / n;
    let mean_dist = points.iter().map(|p| (p.coords - c).norm()).sum::<Real>() / n;
    if mean_dist <= Real::EPSILON {
        return None;
    }

    let s = (3.0_f64).sqrt() / mean_dist;
    #[rustfmt::skip]
    let t = Mat4::new(
        s, 0.0, 0.0, -s * c.x,
        0.0, s, 0.0, -s * c.y,
        0.0, 0.0, s, -s * c.z,
        0.0, 0.0, 0.0, 1.0,
    );
    let norm = points.iter().map(|p| Pt3::from((p.coords - c) * s)).collect();
    Some((norm, t))
}

/// Unit vector spanning the (least-squares) null space of `a`.
///
/// Wide systems are padded with zero rows so that `V^T` is square.
pub fn null_vector(a: &DMatrix<Real>) -> GeometryResult<DVector<Real>> {
    let (rows, cols) = a.shape();
    let work = if rows < cols {
        let mut pad = DMatrix::<Real>::zeros(cols, cols);
        pad.view_mut((0, 0), (rows, cols)).copy_from(a);
        pad
    } else {
        a.clone()
    };

    let svd = work.svd(false, true);
    let v_t = svd.v_t.ok_or(GeometryError::SvdFailed)?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .ok_or(GeometryError::SvdFailed)?;
    Ok(v_t.row(min_idx).transpose())
}

/// Row-major 3x3 matrix from a 9-vector.
pub fn mat3_from_vec(v: &DVector<Real>) -> Mat3 {
    Mat3::from_fn(|r, c| v[3 * r + c])
}

/// Row-major 3x4 matrix from a 12-vector.
pub fn mat34_from_vec(v: &DVector<Real>) -> Matrix3x4<Real> {
    Matrix3x4::from_fn(|r, c| v[4 * r + c])
}

fn sort_dedup(mut roots: Vec<Real>) -> Vec<Real> {
    roots.sort_by(|a, b| a.total_cmp(b));
    roots.dedup_by(|a, b| (*a - *b).abs() < 1e-8);
    roots
}

/// Real roots of `ax² + bx + c`, ascending.
pub fn solve_quadratic_real(a: Real, b: Real, c: Real) -> Vec<Real> {
    let eps = 1e-12;
    if a.abs() < eps {
        if b.abs() < eps {
            return Vec::new();
        }
        return vec![-c / b];
    }
    let disc = b * b - 4.0 * a * c;
    if disc.abs() < eps {
        return vec![-b / (2.0 * a)];
    }
    if disc < 0.0 {
        return Vec::new();
    }
    let sq = disc.sqrt();
    sort_dedup(vec![(-b + sq) / (2.0 * a), (-b - sq) / (2.0 * a)])
}

/// Real roots of `ax³ + bx² + cx + d` (Cardano / trigonometric form), ascending.
pub fn solve_cubic_real(a: Real, b: Real, c: Real, d: Real) -> Vec<Real> {
    let eps = 1e-12;
    if a.abs() < eps {
        return solve_quadratic_real(b, c, d);
    }
    let (b, c, d) = (b / a, c / a, d / a);

    let p = c - b * b / 3.0;
    let q = 2.0 * b * b * b / 27.0 - b * c / 3.0 + d;
    let disc = (q * 0.5).powi(2) + (p / 3.0).powi(3);
    let shift = b / 3.0;

    let roots = if disc > eps {
        let sq = disc.sqrt();
        vec![(-q * 0.5 + sq).cbrt() + (-q * 0.5 - sq).cbrt() - shift]
    } else if disc.abs() <= eps {
        let u = (-q * 0.5).cbrt();
        vec![2.0 * u - shift, -u - shift]
    } else {
        let r = (-p / 3.0).sqrt();
        let phi = ((-q * 0.5) / (r * r * r)).clamp(-1.0, 1.0).acos();
        let tau = 2.0 * std::f64::consts::PI;
        (0..3)
            .map(|k| 2.0 * r * ((phi + tau * k as Real) / 3.0).cos() - shift)
            .collect()
    };
    sort_dedup(roots)
}

/// Real roots of a quartic via the eigenvalues of its companion matrix, ascending.
pub fn solve_quartic_real(a: Real, b: Real, c: Real, d: Real, e: Real) -> Vec<Real> {
    if a.abs() < 1e-12 {
        return solve_cubic_real(b, c, d, e);
    }

    let mut comp = DMatrix::<Real>::zeros(4, 4);
    comp[(0, 0)] = -b / a;
    comp[(0, 1)] = -c / a;
    comp[(0, 2)] = -d / a;
    comp[(0, 3)] = -e / a;
    comp[(1, 0)] = 1.0;
    comp[(2, 1)] = 1.0;
    comp[(3, 2)] = 1.0;

    let roots = Schur::new(comp)
        .complex_eigenvalues()
        .iter()
        .filter(|v| v.im.abs() < 1e-8)
        .map(|v| v.re)
        .collect();
    sort_dedup(roots)
}
