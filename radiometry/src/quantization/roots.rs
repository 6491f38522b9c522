//! Inversion of the quantizer polynomial for the physical correlation coefficient.

use super::coefficients::PolynomialCoefficients;
use std::f64::consts::PI;
use tracing::trace;

/// Convergence threshold of the cube-root fixed-point iteration.
const ROOT_TOLERANCE: f64 = 1e-10;

/// Iteration cap of the cube-root fixed-point iteration.
const MAX_ROOT_ITERATIONS: usize = 10_000;

/// Sign with sign(0) = 0, as the clamping fallback expects.
fn signum0(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Cube root of `k` via `r <- 0.5·(k/r² + r)` seeded at `0.5·k`.
fn refine_cube_root(k: f64) -> f64 {
    let mut r = 0.5 * k;
    for _ in 0..MAX_ROOT_ITERATIONS {
        let next = 0.5 * (k / (r * r) + r);
        let step = (next - r).abs();
        r = next;
        if step <= ROOT_TOLERANCE || !step.is_finite() {
            break;
        }
    }
    r
}

/// Picks the physical root among candidate real roots.
///
/// A single candidate inside (-1, 1) wins outright. Several in-range
/// candidates resolve to the one closest to the measured value. With none
/// in range the coefficient saturates at sign(measured).
fn select_root(candidates: &[f64], measured: f64) -> f64 {
    let in_range: Vec<f64> = candidates
        .iter()
        .copied()
        .filter(|r| r.is_finite() && r.abs() < 1.0)
        .collect();

    match in_range.len() {
        0 => signum0(measured),
        1 => in_range[0],
        _ => in_range
            .into_iter()
            .min_by(|a, b| (a - measured).abs().total_cmp(&(b - measured).abs()))
            .unwrap_or_else(|| signum0(measured)),
    }
}

/// Real roots of `a2·r² + a1·r + a0` (or the linear equation if `a2` vanishes).
fn lower_degree_roots(a2: f64, a1: f64, a0: f64) -> Vec<f64> {
    if a2 != 0.0 {
        let disc = a1 * a1 - 4.0 * a2 * a0;
        if disc < 0.0 {
            return Vec::new();
        }
        let sq = disc.sqrt();
        vec![(-a1 + sq) / (2.0 * a2), (-a1 - sq) / (2.0 * a2)]
    } else if a1 != 0.0 {
        vec![-a0 / a1]
    } else {
        Vec::new()
    }
}

/// Solves `tc3·r³ + tc2·r² + tc1·r + (tc0 - measured) = 0` for the true
/// correlation coefficient behind one measured lag value.
///
/// The result always lies in [-1, 1]. NaN measurements pass through.
pub fn solve_physical_root(coefficients: &PolynomialCoefficients, measured: f64) -> f64 {
    if measured.is_nan() {
        return measured;
    }

    let PolynomialCoefficients { tc0, tc1, tc2, tc3 } = *coefficients;
    let constant = tc0 - measured;

    let root = if tc3 == 0.0 || !tc3.is_finite() {
        select_root(&lower_degree_roots(tc2, tc1, constant), measured)
    } else {
        let a = tc2 / tc3;
        let b = tc1 / tc3;
        let c = constant / tc3;

        // Depressed cubic t³ + p·t + q = 0 with r = t - a/3
        let p = b - a * a / 3.0;
        let q = c + (2.0 * a * a * a - 9.0 * a * b) / 27.0;
        let discriminant = 0.25 * q * q + p * p * p / 27.0;

        if discriminant.is_nan() {
            trace!(measured, "non-finite cubic, passing measurement through");
            measured
        } else if discriminant >= 0.0 {
            let k = 0.5 * q + signum0(q) * discriminant.sqrt();
            if k == 0.0 {
                -a / 3.0
            } else {
                let r = refine_cube_root(k);
                p / (3.0 * r) - r - a / 3.0
            }
        } else {
            // Three real roots, trigonometric form
            let m = 2.0 * (-p / 3.0).sqrt();
            let arg = ((3.0 * q / (2.0 * p)) * (-3.0 / p).sqrt()).clamp(-1.0, 1.0);
            let theta = arg.acos() / 3.0;
            let roots: Vec<f64> = (0..3)
                .map(|k| m * (theta - 2.0 * PI * k as f64 / 3.0).cos() - a / 3.0)
                .filter(|r| r.is_finite())
                .collect();
            select_root(&roots, measured)
        }
    };

    if root.is_nan() || root.abs() > 1.0 {
        signum0(measured)
    } else {
        root
    }
}
