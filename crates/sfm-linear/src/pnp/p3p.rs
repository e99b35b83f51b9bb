//! Kneip-style P3P: three bearings and three world points give up to four poses.

use crate::math::solve_quartic_real;
use crate::rigid::align;
use sfm_core::{ensure_correspondences, GeometryError, GeometryResult, Iso3, Pt2, Pt3, Real, Vec3};

/// Multiply two polynomials of degree <= 4, truncating at degree 4.
fn poly_mul(a: &[Real; 5], b: &[Real; 5]) -> [Real; 5] {
    let mut out = [0.0; 5];
    for i in 0..5 {
        for j in 0..(5 - i) {
            out[i + j] += a[i] * b[j];
        }
    }
    out
}

/// P3P minimal solver.
///
/// Needs exactly three non-collinear world points and their normalized image
/// coordinates. Candidates are sorted by the depth of the first point.
pub fn p3p(world: &[Pt3], normalized: &[Pt2]) -> GeometryResult<Vec<Iso3>> {
    ensure_correspondences(world.len(), normalized.len(), 3)?;
    if world.len() != 3 {
        return Err(GeometryError::InconsistentInput(world.len(), 3));
    }

    let bearings: Vec<Vec3> = normalized
        .iter()
        .map(|n| Vec3::new(n.x, n.y, 1.0).normalize())
        .collect();

    let a = (world[1] - world[2]).norm();
    let b = (world[0] - world[2]).norm();
    let c = (world[0] - world[1]).norm();
    if a <= Real::EPSILON || b <= Real::EPSILON || c <= Real::EPSILON {
        return Err(GeometryError::Degenerate("coincident world points"));
    }

    let cos_alpha = bearings[1].dot(&bearings[2]);
    let cos_beta = bearings[0].dot(&bearings[2]);
    let cos_gamma = bearings[0].dot(&bearings[1]);

    let (a2, b2, c2) = (a * a, b * b, c * c);
    let d = (b2 - a2) / c2;
    let e = b2 / c2;

    // Distances along the rays are x, y = u x, z = v x with v = n(u) / d(u).
    let n_poly = [1.0 - d, 2.0 * d * cos_gamma, -(1.0 + d), 0.0, 0.0];
    let d_poly = [2.0 * cos_beta, -2.0 * cos_alpha, 0.0, 0.0, 0.0];
    let e_poly = [1.0 - e, 2.0 * e * cos_gamma, -e, 0.0, 0.0];

    let nn = poly_mul(&n_poly, &n_poly);
    let nd = poly_mul(&n_poly, &d_poly);
    let edd = poly_mul(&e_poly, &poly_mul(&d_poly, &d_poly));
    let coeffs: Vec<Real> = (0..5)
        .map(|i| nn[i] - 2.0 * cos_beta * nd[i] + edd[i])
        .collect();

    let roots = solve_quartic_real(coeffs[4], coeffs[3], coeffs[2], coeffs[1], coeffs[0]);
    if roots.is_empty() {
        return Err(GeometryError::PolynomialSolveFailed);
    }

    let mut solutions = Vec::new();
    for u in roots {
        let den = 2.0 * (cos_beta - u * cos_alpha);
        let k = 1.0 + u * u - 2.0 * u * cos_gamma;
        if den.abs() < 1e-12 || k.abs() < 1e-12 {
            continue;
        }
        let v = (n_poly[0] + n_poly[1] * u + n_poly[2] * u * u) / den;
        let x2 = c2 / k;
        if x2 <= 0.0 {
            continue;
        }
        let x = x2.sqrt();
        let camera = [bearings[0] * x, bearings[1] * (u * x), bearings[2] * (v * x)];
        if camera.iter().any(|p| p.z <= 0.0) {
            continue;
        }
        if let Ok(pose) = align(world, &camera) {
            solutions.push((x, pose));
        }
    }

    if solutions.is_empty() {
        return Err(GeometryError::PolynomialSolveFailed);
    }
    solutions.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(solutions.into_iter().map(|(_, pose)| pose).collect())
}
