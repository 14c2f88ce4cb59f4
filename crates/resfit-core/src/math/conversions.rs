//! Unit conversion functions
//!
//! Conversions between the representations a VNA export may use for S21
//! (real/imaginary, dB/degrees) and phase helpers used by the baseline
//! smoother.

use num_complex::Complex64;
use std::f64::consts::PI;

/// Convert complex number to dB (20*log10(|z|))
pub fn complex_2_db(z: Complex64) -> f64 {
    20.0 * z.norm().log10()
}

/// Convert complex number to phase in degrees
pub fn complex_2_degree(z: Complex64) -> f64 {
    z.arg() * 180.0 / PI
}

/// Convert dB to magnitude (10^(dB/20))
pub fn db_2_magnitude(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

/// Convert (magnitude, degree) to complex
pub fn magdeg_2_reim(mag: f64, deg: f64) -> Complex64 {
    Complex64::from_polar(mag, degree_2_radian(deg))
}

/// Convert (dB, degree) to complex
pub fn dbdeg_2_reim(db: f64, deg: f64) -> Complex64 {
    magdeg_2_reim(db_2_magnitude(db), deg)
}

/// Convert degrees to radians
pub fn degree_2_radian(deg: f64) -> f64 {
    deg * PI / 180.0
}

/// Wrap an angle into [-π, π]
pub fn wrap_phase(rad: f64) -> f64 {
    let wrapped = (rad + PI).rem_euclid(2.0 * PI) - PI;
    // rem_euclid maps +π to -π; keep +π where it was given exactly
    if wrapped == -PI && rad > 0.0 {
        PI
    } else {
        wrapped
    }
}

/// Remove 2π jumps from a phase sequence
pub fn unwrap_phase(phase: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(phase.len());
    let mut offset = 0.0;
    let mut prev: Option<f64> = None;
    for &p in phase {
        if let Some(q) = prev {
            let d = p - q;
            if d.abs() > PI {
                offset -= 2.0 * PI * (d / (2.0 * PI)).round();
            }
        }
        out.push(p + offset);
        prev = Some(p);
    }
    out
}
