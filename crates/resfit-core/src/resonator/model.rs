//! Resonator transmission model and its analytic gradient
//!
//! ```text
//! S21(f) = A·(1 + slope·Δ)·e^{iφ} · e^{−i·2π·τ·Δ} · N/M
//! Δ = f − f0
//! N = x + i/Qi
//! M = x − Z/Qc + i/Qi + i/Qc
//! ```
//!
//! with detuning `x = 1 − (f/f0)²` for lumped resonators and
//! `x = (4/π)·cot(π·f/(2·f0))` for quarter-wave transmission-line
//! resonators. Both detunings vanish at `f0` with slope `−2/f0`.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::constants::NEAR_ZERO;
use crate::error::ResfitError;

/// Number of entries in the resonator parameter vector
pub const NPARAMS: usize = 8;

/// Parameter vector layout: `[A, φ, slope, τ, f0, Qi, Qc, Z]`
pub(crate) const AMPLITUDE: usize = 0;
pub(crate) const PHASE: usize = 1;
pub(crate) const SLOPE: usize = 2;
pub(crate) const DELAY: usize = 3;
pub(crate) const F0: usize = 4;
pub(crate) const QI: usize = 5;
pub(crate) const QC: usize = 6;
pub(crate) const IMPEDANCE: usize = 7;

/// Selectable resonator model variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResonatorModel {
    /// Gain, phase and delay; slope and impedance ratio held at zero
    #[serde(rename = "simple")]
    Simple,
    /// Adds the linear gain slope; impedance ratio held at zero
    #[serde(rename = "gain_slope")]
    GainSlope,
    /// Every parameter free
    #[default]
    #[serde(rename = "gain_slope_complex")]
    GainSlopeComplex,
    /// Every parameter free, quarter-wave detuning
    #[serde(rename = "tline")]
    TransmissionLine,
}

impl ResonatorModel {
    pub fn name(&self) -> &'static str {
        match self {
            ResonatorModel::Simple => "simple",
            ResonatorModel::GainSlope => "gain_slope",
            ResonatorModel::GainSlopeComplex => "gain_slope_complex",
            ResonatorModel::TransmissionLine => "tline",
        }
    }

    /// Which parameters the optimizer may move
    pub fn free_mask(&self) -> [bool; NPARAMS] {
        let mut mask = [true; NPARAMS];
        match self {
            ResonatorModel::Simple => {
                mask[SLOPE] = false;
                mask[IMPEDANCE] = false;
            }
            ResonatorModel::GainSlope => {
                mask[IMPEDANCE] = false;
            }
            ResonatorModel::GainSlopeComplex | ResonatorModel::TransmissionLine => {}
        }
        mask
    }

    pub fn free_count(&self) -> usize {
        self.free_mask().iter().filter(|&&b| b).count()
    }

    /// Detuning `x(f, f0)` and its partial derivative `∂x/∂f0`
    ///
    /// Returns `None` where the transmission-line form is singular.
    fn detuning(&self, f: f64, f0: f64) -> Option<(f64, f64)> {
        match self {
            ResonatorModel::TransmissionLine => {
                let u = PI * f / (2.0 * f0);
                let (sin_u, cos_u) = u.sin_cos();
                if sin_u.abs() < NEAR_ZERO {
                    return None;
                }
                let x = 4.0 / PI * cos_u / sin_u;
                let dx_df0 = 2.0 * f / (f0 * f0 * sin_u * sin_u);
                Some((x, dx_df0))
            }
            _ => {
                let r = f / f0;
                Some((1.0 - r * r, 2.0 * f * f / (f0 * f0 * f0)))
            }
        }
    }
}

impl fmt::Display for ResonatorModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResonatorModel {
    type Err = ResfitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(ResonatorModel::Simple),
            "gain_slope" => Ok(ResonatorModel::GainSlope),
            "gain_slope_complex" => Ok(ResonatorModel::GainSlopeComplex),
            "tline" | "transmission_line" => Ok(ResonatorModel::TransmissionLine),
            other => Err(ResfitError::InvalidConfig(format!(
                "unknown resonator model {other:?}"
            ))),
        }
    }
}

/// Residual weighting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorEstimate {
    /// Sigma equals |S21| of the data point
    #[default]
    Proportional,
    /// Unit sigma everywhere
    Flat,
}

impl ErrorEstimate {
    pub fn sigma(&self, data: Complex64) -> f64 {
        match self {
            ErrorEstimate::Proportional => data.norm().max(NEAR_ZERO),
            ErrorEstimate::Flat => 1.0,
        }
    }
}

impl FromStr for ErrorEstimate {
    type Err = ResfitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proportional" => Ok(ErrorEstimate::Proportional),
            "flat" => Ok(ErrorEstimate::Flat),
            other => Err(ResfitError::InvalidConfig(format!(
                "unknown error estimate {other:?}"
            ))),
        }
    }
}

/// Shunt response `N/M`, `None` where it is undefined
#[inline]
fn shunt_parts(x: f64, qi: f64, qc: f64, z: f64) -> Option<(Complex64, Complex64)> {
    if !(qi > 0.0) || !(qc > 0.0) {
        return None;
    }
    let n = Complex64::new(x, 1.0 / qi);
    let m = Complex64::new(x - z / qc, 1.0 / qi + 1.0 / qc);
    if m.norm_sqr() < NEAR_ZERO * NEAR_ZERO {
        return None;
    }
    Some((n, m))
}

/// Model S21 at frequency `f` (GHz) for parameter vector `p`
pub fn evaluate_point(model: ResonatorModel, p: &[f64], f: f64) -> Option<Complex64> {
    let (x, _) = model.detuning(f, p[F0])?;
    let (n, m) = shunt_parts(x, p[QI], p[QC], p[IMPEDANCE])?;
    let delta = f - p[F0];
    let gain = Complex64::from_polar(p[AMPLITUDE] * (1.0 + p[SLOPE] * delta), p[PHASE]);
    let delay = Complex64::from_polar(1.0, -2.0 * PI * p[DELAY] * delta);
    Some(gain * delay * n / m)
}

/// Model S21 and `∂S21/∂p_j` for every parameter
pub fn evaluate_with_gradient(
    model: ResonatorModel,
    p: &[f64],
    f: f64,
) -> Option<(Complex64, [Complex64; NPARAMS])> {
    let (x, dx_df0) = model.detuning(f, p[F0])?;
    let (qi, qc, z) = (p[QI], p[QC], p[IMPEDANCE]);
    let (n, m) = shunt_parts(x, qi, qc, z)?;
    let i = Complex64::i();

    let delta = f - p[F0];
    let rot = Complex64::from_polar(1.0, p[PHASE]);
    let gain = rot * p[AMPLITUDE] * (1.0 + p[SLOPE] * delta);
    let delay = Complex64::from_polar(1.0, -2.0 * PI * p[DELAY] * delta);
    let m2 = m * m;
    let r = n / m;
    let s = gain * delay * r;
    let gd = gain * delay;

    let dr_dx = (i - z) / (qc * m2);
    let dr_dqi = -i / (qi * qi) * (m - n) / m2;
    let dr_dqc = -n * Complex64::new(z / (qc * qc), -1.0 / (qc * qc)) / m2;
    let dr_dz = n / (qc * m2);

    let mut grad = [Complex64::new(0.0, 0.0); NPARAMS];
    grad[AMPLITUDE] = rot * (1.0 + p[SLOPE] * delta) * delay * r;
    grad[PHASE] = i * s;
    grad[SLOPE] = rot * p[AMPLITUDE] * delta * delay * r;
    grad[DELAY] = -i * 2.0 * PI * delta * s;
    grad[F0] = -rot * p[AMPLITUDE] * p[SLOPE] * delay * r
        + gain * (i * 2.0 * PI * p[DELAY]) * delay * r
        + gd * dr_dx * dx_df0;
    grad[QI] = gd * dr_dqi;
    grad[QC] = gd * dr_dqc;
    grad[IMPEDANCE] = gd * dr_dz;
    Some((s, grad))
}

/// Complex dip at the centre frequency, `1 − N/M` evaluated at `x = 0`
pub(crate) fn resonance_contrast(qi: f64, qc: f64, z: f64) -> Option<Complex64> {
    let (n, m) = shunt_parts(0.0, qi, qc, z)?;
    Some(Complex64::new(1.0, 0.0) - n / m)
}
