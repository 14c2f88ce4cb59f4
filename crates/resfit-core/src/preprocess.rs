//! Removal of instrumental artifacts from a raw S21 trace
//!
//! Three independent corrections, each producing a new trace:
//!
//! - group delay (cable length) via [`remove_group_delay`]
//! - complex gain and its linear slope, estimated from the spectrum edges,
//!   via [`remove_edge_gain_and_slope`]
//! - slow baseline ripple, estimated with a wide Savitzky-Golay window,
//!   via [`remove_baseline_ripple`]
//!
//! Group delay sign convention: a cable of delay `τ` multiplies S21 by
//! `exp(−i·2π·f·τ)`, the same factor the resonator model applies. Removal
//! therefore multiplies by `exp(+i·2π·f·τ)`.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{debug, warn};

use crate::config::PreprocessConfig;
use crate::constants::NEAR_ZERO;
use crate::error::{ResfitError, Result};
use crate::math::conversions::unwrap_phase;
use crate::math::savgol::{raw_window_length, window_length, SavitzkyGolay};
use crate::spectrum::SpectrumTrace;

/// Which representation of S21 the baseline smoother works on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMode {
    /// Smooth real and imaginary parts independently
    #[default]
    RealImag,
    /// Smooth magnitude and unwrapped phase independently
    MagnitudePhase,
}

/// Whether baseline ripple removal actually ran
#[derive(Debug, Clone, PartialEq)]
pub enum BaselineOutcome {
    Applied { window: usize },
    Skipped { reason: String },
}

/// Complex gain estimated at both edges of a trace
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeGain {
    pub f_left: f64,
    pub g_left: Complex64,
    pub f_right: f64,
    pub g_right: Complex64,
}

impl EdgeGain {
    /// Estimate from the mean of the first and last `depth` samples
    pub fn estimate(trace: &SpectrumTrace, depth: usize) -> Result<Self> {
        let n = trace.len();
        if depth == 0 || 2 * depth > n {
            return Err(ResfitError::InvalidWindow {
                parameter: "edge_search_depth",
                value: depth,
                len: n,
            });
        }
        let f = trace.freqs();
        let s = trace.s21();
        let mean_f = |r: std::ops::Range<usize>| f.slice(ndarray::s![r]).sum() / depth as f64;
        let mean_s = |r: std::ops::Range<usize>| {
            s.slice(ndarray::s![r]).iter().sum::<Complex64>() / depth as f64
        };
        Ok(Self {
            f_left: mean_f(0..depth),
            g_left: mean_s(0..depth),
            f_right: mean_f(n - depth..n),
            g_right: mean_s(n - depth..n),
        })
    }

    /// Linearly interpolated (and extrapolated) complex gain at `f`
    pub fn at(&self, f: f64) -> Complex64 {
        let t = (f - self.f_left) / (self.f_right - self.f_left);
        self.g_left + (self.g_right - self.g_left) * t
    }
}

/// Multiply each sample by `exp(+i·2π·f·τ)` (f in GHz, τ in ns)
pub fn remove_group_delay(trace: &SpectrumTrace, group_delay_ns: f64) -> SpectrumTrace {
    trace.map_s21(|f, z| z * Complex64::from_polar(1.0, 2.0 * PI * f * group_delay_ns))
}

/// Divide out a complex gain interpolated linearly between the two edges
///
/// Fails with `InvalidWindow` if `edge_search_depth` is zero or the two
/// averaging windows would overlap.
pub fn remove_edge_gain_and_slope(
    trace: &SpectrumTrace,
    edge_search_depth: usize,
) -> Result<SpectrumTrace> {
    let gain = EdgeGain::estimate(trace, edge_search_depth)?;
    let mut out = Vec::with_capacity(trace.len());
    for (&f, &z) in trace.freqs().iter().zip(trace.s21().iter()) {
        let g = gain.at(f);
        if g.norm() < NEAR_ZERO {
            return Err(ResfitError::InvalidSpectrum(format!(
                "edge gain interpolates through zero at {f} GHz"
            )));
        }
        out.push(z / g);
    }
    Ok(trace.with_s21(out.into()))
}

/// Divide out a wide-window Savitzky-Golay estimate of the baseline
///
/// The window is `round(baseline_scale_khz / spacing)` forced odd and
/// `>= baseline_order + 1`. If the unforced length is `<= baseline_order`
/// (the scale is too short to describe a baseline) or the window does not
/// fit in the trace, the trace is returned unchanged and the outcome says
/// why.
pub fn remove_baseline_ripple(
    trace: &SpectrumTrace,
    baseline_scale_khz: f64,
    baseline_order: usize,
    mode: BaselineMode,
) -> Result<(SpectrumTrace, BaselineOutcome)> {
    let spacing = trace.spacing_khz();
    let raw = raw_window_length(baseline_scale_khz, spacing);
    if raw <= baseline_order {
        let reason = format!(
            "baseline scale {baseline_scale_khz} kHz spans {raw} samples, not more than order {baseline_order}"
        );
        warn!(%reason, "skipping baseline ripple removal");
        return Ok((trace.clone(), BaselineOutcome::Skipped { reason }));
    }
    let window = window_length(baseline_scale_khz, spacing, baseline_order);
    if window > trace.len() {
        let reason = format!(
            "baseline window of {window} samples exceeds trace length {}",
            trace.len()
        );
        warn!(%reason, "skipping baseline ripple removal");
        return Ok((trace.clone(), BaselineOutcome::Skipped { reason }));
    }

    let sg = SavitzkyGolay::new(window, baseline_order)?;
    let s = trace.s21();
    let baseline: Vec<Complex64> = match mode {
        BaselineMode::RealImag => {
            let re: Vec<f64> = s.iter().map(|z| z.re).collect();
            let im: Vec<f64> = s.iter().map(|z| z.im).collect();
            let re = sg.smooth(&re)?;
            let im = sg.smooth(&im)?;
            re.into_iter()
                .zip(im)
                .map(|(a, b)| Complex64::new(a, b))
                .collect()
        }
        BaselineMode::MagnitudePhase => {
            let mag: Vec<f64> = s.iter().map(|z| z.norm()).collect();
            let phase: Vec<f64> = s.iter().map(|z| z.arg()).collect();
            let mag = sg.smooth(&mag)?;
            let phase = sg.smooth(&unwrap_phase(&phase))?;
            mag.into_iter()
                .zip(phase)
                .map(|(m, p)| Complex64::from_polar(m, p))
                .collect()
        }
    };

    if let Some(i) = baseline.iter().position(|b| b.norm() < NEAR_ZERO) {
        let reason = format!("smoothed baseline vanishes at sample {i}");
        warn!(%reason, "skipping baseline ripple removal");
        return Ok((trace.clone(), BaselineOutcome::Skipped { reason }));
    }

    let corrected = s.iter().zip(&baseline).map(|(z, b)| z / b).collect();
    debug!(window, ?mode, "baseline ripple removed");
    Ok((trace.with_s21(corrected), BaselineOutcome::Applied { window }))
}

/// Preprocessed trace plus a record of what was done to it
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub trace: SpectrumTrace,
    /// `None` when ripple removal was not requested
    pub baseline: Option<BaselineOutcome>,
}

/// Applies the configured corrections in order: delay, edge gain, ripple
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    pub fn run(&self, trace: &SpectrumTrace) -> Result<Preprocessed> {
        let cfg = &self.config;
        let mut out = if cfg.group_delay_ns != 0.0 {
            remove_group_delay(trace, cfg.group_delay_ns)
        } else {
            trace.clone()
        };
        if cfg.edge_search_depth > 0 {
            out = remove_edge_gain_and_slope(&out, cfg.edge_search_depth)?;
        }
        let baseline = match cfg.baseline_scale_khz {
            Some(scale) => {
                let (t, outcome) =
                    remove_baseline_ripple(&out, scale, cfg.baseline_order, cfg.baseline_mode)?;
                out = t;
                Some(outcome)
            }
            None => None,
        };
        Ok(Preprocessed {
            trace: out,
            baseline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frequency::linspace_ghz;
    use approx::assert_relative_eq;

    fn trace_from<F: Fn(f64) -> Complex64>(n: usize, f: F) -> SpectrumTrace {
        let freqs = linspace_ghz(4.0, 4.2, n);
        let s = freqs.iter().map(|&x| f(x)).collect();
        SpectrumTrace::new(freqs, s).unwrap()
    }

    #[test]
    fn test_group_delay_removal_flattens_phase() {
        let tau = 12.5;
        let t = trace_from(201, |f| Complex64::from_polar(0.8, -2.0 * PI * f * tau));
        let out = remove_group_delay(&t, tau);
        for z in out.s21() {
            assert_relative_eq!(z.re, 0.8, epsilon = 1e-9);
            assert_relative_eq!(z.im, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_edge_gain_and_slope_removed() {
        // Linear complex gain across the band
        let g = |f: f64| Complex64::new(0.5 + 2.0 * (f - 4.0), 0.3 - 1.0 * (f - 4.0));
        let t = trace_from(101, g);
        let out = remove_edge_gain_and_slope(&t, 10).unwrap();
        for z in out.s21() {
            assert_relative_eq!(z.re, 1.0, epsilon = 1e-9);
            assert_relative_eq!(z.im, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_edge_depth_must_fit() {
        let t = trace_from(20, |_| Complex64::new(1.0, 0.0));
        assert!(remove_edge_gain_and_slope(&t, 10).is_ok());
        let err = remove_edge_gain_and_slope(&t, 11).unwrap_err();
        assert!(matches!(
            err,
            ResfitError::InvalidWindow {
                parameter: "edge_search_depth",
                value: 11,
                len: 20
            }
        ));
        assert!(remove_edge_gain_and_slope(&t, 0).is_err());
    }

    #[test]
    fn test_baseline_ripple_removed() {
        // Slow ripple (period 100 MHz) on a 200 MHz span with 1 MHz spacing
        let ripple = |f: f64| Complex64::new(1.0 + 0.1 * (2.0 * PI * f / 0.1).sin(), 0.05);
        let t = trace_from(201, ripple);
        let (out, outcome) =
            remove_baseline_ripple(&t, 15_000.0, 3, BaselineMode::RealImag).unwrap();
        assert_eq!(outcome, BaselineOutcome::Applied { window: 15 });
        for z in out.s21() {
            assert!((z.norm() - 1.0).abs() < 5e-3, "residual ripple {}", z.norm());
        }
    }

    #[test]
    fn test_baseline_magnitude_phase_mode() {
        let ripple = |f: f64| {
            Complex64::from_polar(1.0 + 0.05 * (2.0 * PI * f / 0.1).cos(), 40.0 * f)
        };
        let t = trace_from(201, ripple);
        let (out, outcome) =
            remove_baseline_ripple(&t, 15_000.0, 3, BaselineMode::MagnitudePhase).unwrap();
        assert!(matches!(outcome, BaselineOutcome::Applied { .. }));
        for z in out.s21() {
            assert!((z.norm() - 1.0).abs() < 5e-3);
            assert!(z.arg().abs() < 5e-3);
        }
    }

    #[test]
    fn test_baseline_skipped_when_scale_too_short() {
        let t = trace_from(201, |_| Complex64::new(1.0, 0.0));
        // 1 MHz spacing, 2 MHz scale -> 2 samples, order 3
        let (out, outcome) = remove_baseline_ripple(&t, 2_000.0, 3, BaselineMode::RealImag).unwrap();
        assert!(matches!(outcome, BaselineOutcome::Skipped { .. }));
        assert_eq!(out, t);
    }

    #[test]
    fn test_baseline_skipped_when_window_too_long() {
        let t = trace_from(21, |_| Complex64::new(1.0, 0.0));
        let (_, outcome) =
            remove_baseline_ripple(&t, 1_000_000.0, 3, BaselineMode::RealImag).unwrap();
        assert!(matches!(outcome, BaselineOutcome::Skipped { .. }));
    }

    #[test]
    fn test_preprocessor_chain() {
        let tau = 3.0;
        let t = trace_from(201, |f| {
            Complex64::new(2.0, 0.0) * Complex64::from_polar(1.0, -2.0 * PI * f * tau)
        });
        let pre = Preprocessor::new(PreprocessConfig {
            group_delay_ns: tau,
            edge_search_depth: 10,
            ..Default::default()
        });
        let out = pre.run(&t).unwrap();
        assert!(out.baseline.is_none());
        for z in out.trace.s21() {
            assert_relative_eq!(z.re, 1.0, epsilon = 1e-9);
            assert_relative_eq!(z.im, 0.0, epsilon = 1e-9);
        }
    }
}
