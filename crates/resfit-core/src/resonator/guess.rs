//! Starting point and box constraints for the resonator fit
//!
//! The optimizer is only locally convergent, so the starting point is
//! built from the data:
//!
//! - gain and phase from the mean of the edge samples
//! - gain slope and group delay from the difference between the two edges
//! - `f0` at the minimum of the smoothed, edge-normalized `|S21|²`
//! - `Qt = f0 / FWHM`, split into `Qi` and `Qc` using the dip depth

use std::f64::consts::PI;

use tracing::debug;

use super::model::{
    ResonatorModel, AMPLITUDE, DELAY, F0, IMPEDANCE, NPARAMS, PHASE, QC, QI, SLOPE,
};
use crate::config::FitConfig;
use crate::error::{ResfitError, Result};
use crate::math::conversions::wrap_phase;
use crate::math::savgol::SavitzkyGolay;
use crate::optimize::Bounds;
use crate::preprocess::EdgeGain;
use crate::spectrum::SpectrumTrace;

/// Normalized power dips shallower than this carry no Q information
const MIN_GUESS_DEPTH: f64 = 1e-3;

/// Starting parameter values for one resonator fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InitialGuess {
    pub base_amplitude_abs: f64,
    pub phase_rad: f64,
    pub amplitude_slope: f64,
    pub group_delay_ns: f64,
    pub center_frequency_ghz: f64,
    pub q_internal: f64,
    pub q_coupled: f64,
    pub impedance_ratio: f64,
}

impl InitialGuess {
    pub fn to_vector(&self) -> [f64; NPARAMS] {
        [
            self.base_amplitude_abs,
            self.phase_rad,
            self.amplitude_slope,
            self.group_delay_ns,
            self.center_frequency_ghz,
            self.q_internal,
            self.q_coupled,
            self.impedance_ratio,
        ]
    }

    pub fn from_vector(p: &[f64; NPARAMS]) -> Self {
        Self {
            base_amplitude_abs: p[AMPLITUDE],
            phase_rad: p[PHASE],
            amplitude_slope: p[SLOPE],
            group_delay_ns: p[DELAY],
            center_frequency_ghz: p[F0],
            q_internal: p[QI],
            q_coupled: p[QC],
            impedance_ratio: p[IMPEDANCE],
        }
    }
}

/// Box constraints of the resonator fit for one frequency window
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterBounds {
    bounds: Bounds,
}

impl ParameterBounds {
    /// Physical bounds with `f0` confined to `[f_min, f_max]`
    pub fn for_window(f_min: f64, f_max: f64) -> Self {
        let mut bounds = Bounds::unbounded(NPARAMS);
        bounds.set(AMPLITUDE, 0.0, f64::INFINITY);
        bounds.set(PHASE, -PI, PI);
        bounds.set(SLOPE, -1000.0, 1000.0);
        bounds.set(DELAY, -100.0, 100.0);
        bounds.set(F0, f_min, f_max);
        bounds.set(QI, 0.0, f64::INFINITY);
        bounds.set(QC, 0.0, f64::INFINITY);
        bounds.set(IMPEDANCE, -5.0, 5.0);
        Self { bounds }
    }

    /// Move every out-of-range value onto its nearest bound
    pub fn clamp(&self, guess: &InitialGuess) -> InitialGuess {
        let mut p = guess.to_vector();
        self.bounds.clamp(&mut p);
        InitialGuess::from_vector(&p)
    }

    pub fn contains(&self, guess: &InitialGuess) -> bool {
        self.bounds.contains(&guess.to_vector())
    }

    pub fn as_bounds(&self) -> &Bounds {
        &self.bounds
    }
}

/// Half-maximum crossings of a dip in a normalized curve
///
/// `y` is expected to sit near 1 off resonance. The half-depth level is
/// `(1 + min(y)) / 2`; each crossing is linearly interpolated between the
/// bracketing samples. Returns `None` if either side never reaches the
/// level.
pub fn fwhm(freqs: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    if freqs.len() != y.len() || y.len() < 3 {
        return None;
    }
    let (imin, &ymin) = y
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let level = 0.5 * (1.0 + ymin);
    let cross = |i: usize, j: usize| -> f64 {
        // Linear interpolation between sample i (below level) and j (at/above)
        let t = (level - y[i]) / (y[j] - y[i]);
        freqs[i] + t * (freqs[j] - freqs[i])
    };

    let left = (0..imin).rev().find(|&i| y[i] >= level).map(|i| cross(i + 1, i))?;
    let right = (imin + 1..y.len()).find(|&i| y[i] >= level).map(|i| cross(i - 1, i))?;
    if left.is_finite() && right.is_finite() && right > left {
        Some((left, right))
    } else {
        None
    }
}

/// Data-driven starting point, clamped into the window's bounds
pub fn initial_guess(window: &SpectrumTrace, config: &FitConfig) -> Result<InitialGuess> {
    let n = window.len();
    if n < 4 {
        return Err(ResfitError::InsufficientData {
            required: 4,
            available: n,
            context: "resonator initial guess",
        });
    }
    let depth = config.edge_points.min(n / 4).max(1);
    let edges = EdgeGain::estimate(window, depth)?;
    let df = edges.f_right - edges.f_left;

    let amp_l = edges.g_left.norm();
    let amp_r = edges.g_right.norm();
    let base_amplitude_abs = 0.5 * (amp_l + amp_r);
    let phase_rad = ((edges.g_left + edges.g_right) * 0.5).arg();
    let mut amplitude_slope = if base_amplitude_abs > 0.0 {
        (amp_r - amp_l) / df / base_amplitude_abs
    } else {
        0.0
    };
    let dphi = wrap_phase(edges.g_right.arg() - edges.g_left.arg());
    let group_delay_ns = -dphi / (2.0 * PI * df);
    if config.model == ResonatorModel::Simple {
        amplitude_slope = 0.0;
    }

    // Edge-normalized power, lightly smoothed
    let freqs = window.freqs();
    let power: Vec<f64> = freqs
        .iter()
        .zip(window.s21().iter())
        .map(|(&f, &z)| {
            let g = edges.at(f);
            if g.norm() > 0.0 {
                (z / g).norm_sqr()
            } else {
                z.norm_sqr()
            }
        })
        .collect();
    let power = smooth_power(&power);

    let freqs = freqs.to_vec();
    let (imin, ymin) = power
        .iter()
        .copied()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or((n / 2, 1.0));
    let f0 = freqs[imin];

    let span = window.span_ghz();
    let (q_internal, q_coupled) = if ymin.is_finite() && ymin < 1.0 - MIN_GUESS_DEPTH {
        let q_total = match fwhm(&freqs, &power) {
            Some((lo, hi)) if (f0 / (hi - lo)).is_finite() => f0 / (hi - lo),
            _ => {
                debug!(f0, "half-depth crossings not bracketed, using window span for Qt");
                f0 / span
            }
        };
        split_q(q_total, ymin)
    } else {
        debug!(f0, ymin, "no usable dip, using window span for Qt");
        let q_total = f0 / span;
        (2.0 * q_total, 2.0 * q_total)
    };

    let guess = InitialGuess {
        base_amplitude_abs,
        phase_rad,
        amplitude_slope,
        group_delay_ns,
        center_frequency_ghz: f0,
        q_internal,
        q_coupled,
        impedance_ratio: 0.0,
    };
    let bounds = ParameterBounds::for_window(window.f_min(), window.f_max());
    let clamped = bounds.clamp(&guess);
    debug!(?clamped, "resonator initial guess");
    Ok(clamped)
}

/// `Qi = Qt/sqrt(min)`, `Qc = 1/(1/Qt − 1/Qi)`; equal split when the depth
/// is not usable
fn split_q(q_total: f64, ymin: f64) -> (f64, f64) {
    if ymin > 0.0 && ymin < 1.0 {
        let qi = q_total / ymin.sqrt();
        let qc = 1.0 / (1.0 / q_total - 1.0 / qi);
        if qi.is_finite() && qc.is_finite() && qc > 0.0 {
            return (qi, qc);
        }
    }
    (2.0 * q_total, 2.0 * q_total)
}

/// Savitzky-Golay smoothing with a window of about n/50 samples
fn smooth_power(power: &[f64]) -> Vec<f64> {
    let mut w = (power.len() / 50).max(3);
    if w % 2 == 0 {
        w += 1;
    }
    match SavitzkyGolay::new(w, 2).and_then(|sg| sg.smooth(power)) {
        Ok(smoothed) => smoothed,
        Err(_) => power.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frequency::linspace_ghz;
    use crate::resonator::model::evaluate_point;
    use approx::assert_relative_eq;
    use num_complex::Complex64;

    fn dip_window(p: &[f64; NPARAMS], n: usize) -> SpectrumTrace {
        let freqs = linspace_ghz(p[F0] - 0.002, p[F0] + 0.002, n);
        let s: Vec<Complex64> = freqs
            .iter()
            .map(|&f| evaluate_point(ResonatorModel::GainSlopeComplex, p, f).unwrap())
            .collect();
        SpectrumTrace::new(freqs, s).unwrap()
    }

    #[test]
    fn test_fwhm_of_lorentzian() {
        let freqs = linspace_ghz(-1.0, 1.0, 2001);
        let gamma = 0.1;
        let y: Vec<f64> = freqs
            .iter()
            .map(|&f| 1.0 - 0.8 / (1.0 + (f / gamma).powi(2)))
            .collect();
        let (lo, hi) = fwhm(&freqs, &y).unwrap();
        assert_relative_eq!(lo, -gamma, epsilon = 1e-4);
        assert_relative_eq!(hi, gamma, epsilon = 1e-4);
    }

    #[test]
    fn test_fwhm_unbracketed() {
        let freqs = linspace_ghz(0.0, 1.0, 11);
        // Monotone ramp: no crossing on the left of the minimum
        let y: Vec<f64> = (0..11).map(|i| i as f64 / 10.0).collect();
        assert!(fwhm(&freqs, &y).is_none());
    }

    #[test]
    fn test_guess_close_to_truth() {
        let truth = [1.0, 0.0, 0.0, 0.0, 4.1, 5e4, 2e4, 0.0];
        let window = dip_window(&truth, 401);
        let g = initial_guess(&window, &FitConfig::default()).unwrap();
        assert!((g.center_frequency_ghz - 4.1).abs() < 1.5e-5);
        let qt = 1.0 / (1.0 / 5e4 + 1.0 / 2e4);
        let qt_guess = 1.0 / (1.0 / g.q_internal + 1.0 / g.q_coupled);
        assert!((qt_guess / qt - 1.0).abs() < 0.2, "Qt guess {qt_guess}");
        assert!((g.q_internal / 5e4 - 1.0).abs() < 0.3, "Qi guess {}", g.q_internal);
        assert!((g.base_amplitude_abs - 1.0).abs() < 0.05);
        assert_eq!(g.impedance_ratio, 0.0);
    }

    #[test]
    fn test_flat_window_falls_back_to_span() {
        let freqs = linspace_ghz(4.0, 4.004, 101);
        let s = vec![Complex64::new(0.7, 0.0); 101];
        let window = SpectrumTrace::new(freqs, s).unwrap();
        let g = initial_guess(&window, &FitConfig::default()).unwrap();
        let qt = g.center_frequency_ghz / window.span_ghz();
        assert!(g.q_internal.is_finite() && g.q_coupled.is_finite());
        assert!(g.q_internal > 0.0 && g.q_coupled > 0.0);
        // A flat window has no usable depth: Qt from the span, split equally
        assert_relative_eq!(g.q_internal, 2.0 * qt, max_relative = 1e-9);
        assert_relative_eq!(g.q_coupled, 2.0 * qt, max_relative = 1e-9);
    }

    #[test]
    fn test_clamp_to_nearest_bound() {
        let bounds = ParameterBounds::for_window(4.0, 4.2);
        let wild = InitialGuess {
            base_amplitude_abs: -0.5,
            phase_rad: 4.0,
            amplitude_slope: -5000.0,
            group_delay_ns: 250.0,
            center_frequency_ghz: 3.9,
            q_internal: -1.0,
            q_coupled: 1e5,
            impedance_ratio: 9.0,
        };
        assert!(!bounds.contains(&wild));
        let c = bounds.clamp(&wild);
        assert_eq!(c.base_amplitude_abs, 0.0);
        assert_eq!(c.phase_rad, PI);
        assert_eq!(c.amplitude_slope, -1000.0);
        assert_eq!(c.group_delay_ns, 100.0);
        assert_eq!(c.center_frequency_ghz, 4.0);
        assert_eq!(c.q_internal, 0.0);
        assert_eq!(c.q_coupled, 1e5);
        assert_eq!(c.impedance_ratio, 5.0);
        assert!(bounds.contains(&c));
    }
}
