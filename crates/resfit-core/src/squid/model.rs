//! rf-SQUID modulated resonance frequency
//!
//! ```text
//! φe(I) = (I − I0)·rate                      I in µA, rate in rad/µA
//! φ + λ·sin φ = φe                           solved for φ
//! H(φ, λ) = (1 − λ²)·cos φ / (1 + λ·cos φ) + λ
//! f0(I) = f2 + (P/2)·H
//! ```
//!
//! `H` swings between −1 (φ = π) and +1 (φ = 0), so `P` is the
//! peak-to-peak modulation depth and `f2` its midpoint.

use crate::constants::{PHASE_SOLVE_MAX_ITER, PHASE_SOLVE_TOL};

/// Number of entries in the SQUID parameter vector
pub const NPARAMS: usize = 5;

/// Parameter vector layout: `[I0, rate, f2, P, λ]`
pub(crate) const I0: usize = 0;
pub(crate) const RATE: usize = 1;
pub(crate) const F2: usize = 2;
pub(crate) const DEPTH: usize = 3;
pub(crate) const LAMBDA: usize = 4;

/// Solve `φ + λ·sin φ = φe` for `φ`
///
/// Newton's method seeded at `φe`, safeguarded by the bracket
/// `[φe − λ, φe + λ]`: any Newton step leaving the bracket is replaced by
/// bisection. The left side is strictly increasing for `0 <= λ < 1`, so
/// the root is unique. Returns `None` for `λ` outside `[0, 1)`, non-finite
/// input, or if the iteration cap is hit.
pub fn solve_phase(phi_e: f64, lambda: f64) -> Option<f64> {
    if !phi_e.is_finite() || !(0.0..1.0).contains(&lambda) {
        return None;
    }
    if lambda == 0.0 {
        return Some(phi_e);
    }

    let g = |phi: f64| phi + lambda * phi.sin() - phi_e;
    let mut lo = phi_e - lambda;
    let mut hi = phi_e + lambda;
    let mut phi = phi_e;

    for _ in 0..PHASE_SOLVE_MAX_ITER {
        let value = g(phi);
        if value == 0.0 {
            return Some(phi);
        }
        if value < 0.0 {
            lo = phi;
        } else {
            hi = phi;
        }

        let slope = 1.0 + lambda * phi.cos();
        let newton = phi - value / slope;
        let next = if newton > lo && newton < hi {
            newton
        } else {
            0.5 * (lo + hi)
        };
        if (next - phi).abs() <= PHASE_SOLVE_TOL || hi - lo <= PHASE_SOLVE_TOL {
            return Some(next);
        }
        phi = next;
    }
    None
}

/// Normalized transfer function `H(φ, λ)`
#[inline]
pub fn transfer(phi: f64, lambda: f64) -> f64 {
    let c = phi.cos();
    (1.0 - lambda * lambda) * c / (1.0 + lambda * c) + lambda
}

/// Resonance frequency (GHz) at flux-ramp current `current_ua`
pub fn resonance_frequency(p: &[f64], current_ua: f64) -> Option<f64> {
    let phi = solve_phase((current_ua - p[I0]) * p[RATE], p[LAMBDA])?;
    Some(p[F2] + 0.5 * p[DEPTH] * transfer(phi, p[LAMBDA]))
}

/// Resonance frequency and its gradient with respect to `[I0, rate, f2, P, λ]`
pub fn frequency_with_gradient(p: &[f64], current_ua: f64) -> Option<(f64, [f64; NPARAMS])> {
    let lambda = p[LAMBDA];
    let di = current_ua - p[I0];
    let phi = solve_phase(di * p[RATE], lambda)?;
    let (s, c) = phi.sin_cos();
    let denom = 1.0 + lambda * c;
    let l2 = 1.0 - lambda * lambda;
    let h = l2 * c / denom + lambda;
    let half_p = 0.5 * p[DEPTH];

    // Implicit derivatives of φ
    let dphi_dphie = 1.0 / denom;
    let dphi_dlambda = -s / denom;
    // H through cos φ, then the explicit λ dependence
    let dh_dc = l2 / (denom * denom);
    let dh_dphi = -dh_dc * s;
    let dh_dlambda = (-2.0 * lambda * c * denom - l2 * c * c) / (denom * denom) + 1.0;

    let mut grad = [0.0; NPARAMS];
    grad[I0] = half_p * dh_dphi * dphi_dphie * (-p[RATE]);
    grad[RATE] = half_p * dh_dphi * dphi_dphie * di;
    grad[F2] = 1.0;
    grad[DEPTH] = 0.5 * h;
    grad[LAMBDA] = half_p * (dh_dlambda + dh_dphi * dphi_dlambda);
    Some((p[F2] + half_p * h, grad))
}
