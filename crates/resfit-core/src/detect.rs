//! Resonance detection from the phase slope of S21
//!
//! The smoothed trace is differentiated between neighbouring samples and
//! the derivative is projected onto the local polar frame of S21. The
//! tangential component, normalized by |S21|², is the phase slope
//! `dθ/df`; `Q_stat = (dθ/df)·f/2` peaks near the loaded Q of a notch
//! resonator at its centre and is negative in its tails.
//!
//! Peaks above `cutoff_rate` are kept if no sample within
//! `minimum_spacing_khz` is strictly larger. Among equal maxima the
//! lowest-frequency sample wins.

use num_complex::Complex64;
use tracing::debug;

use crate::config::DetectorConfig;
use crate::constants::NEAR_ZERO;
use crate::error::{ResfitError, Result};
use crate::frequency::khz_to_ghz;
use crate::math::savgol::{window_length, SavitzkyGolay};
use crate::spectrum::SpectrumTrace;

/// A detected resonance dip
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResonanceCandidate {
    pub center_frequency_ghz: f64,
    /// Phase-slope quality estimate at the peak
    pub quality_statistic: f64,
}

/// Derivative of the smoothed trace in its local polar frame
///
/// One entry per adjacent pair of input samples, located at the pair's
/// midpoint frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityStatistic {
    pub freqs: Vec<f64>,
    /// `Re(dS/df · conj(S)) / |S|² · f/2`, the log-amplitude slope
    pub radial: Vec<f64>,
    /// `Im(dS/df · conj(S)) / |S|² · f/2`, the phase slope
    pub tangential: Vec<f64>,
    /// Savitzky-Golay window used for smoothing
    pub window: usize,
}

/// Compute the phase-slope statistic for a preprocessed trace
pub fn quality_statistic(
    trace: &SpectrumTrace,
    smoothing_scale_khz: f64,
    smoothing_order: usize,
) -> Result<QualityStatistic> {
    let window = window_length(smoothing_scale_khz, trace.spacing_khz(), smoothing_order);
    let sg = SavitzkyGolay::new(window, smoothing_order)?;

    let s = trace.s21();
    let re: Vec<f64> = s.iter().map(|z| z.re).collect();
    let im: Vec<f64> = s.iter().map(|z| z.im).collect();
    let re = sg.smooth(&re)?;
    let im = sg.smooth(&im)?;
    let smoothed: Vec<Complex64> = re
        .into_iter()
        .zip(im)
        .map(|(a, b)| Complex64::new(a, b))
        .collect();

    let f = trace.freqs();
    let n = smoothed.len();
    let mut freqs = Vec::with_capacity(n - 1);
    let mut radial = Vec::with_capacity(n - 1);
    let mut tangential = Vec::with_capacity(n - 1);
    for k in 0..n - 1 {
        let df = f[k + 1] - f[k];
        let d = (smoothed[k + 1] - smoothed[k]) / df;
        let mid = (smoothed[k] + smoothed[k + 1]) * 0.5;
        let fm = 0.5 * (f[k] + f[k + 1]);
        let power = mid.norm_sqr();
        freqs.push(fm);
        if power < NEAR_ZERO {
            radial.push(0.0);
            tangential.push(0.0);
        } else {
            // Rotate the derivative into the frame of the local phasor
            let rotated = d * mid.conj() / power;
            radial.push(rotated.re * fm / 2.0);
            tangential.push(rotated.im * fm / 2.0);
        }
    }

    Ok(QualityStatistic {
        freqs,
        radial,
        tangential,
        window,
    })
}

/// Indices of peaks in `q_stat` that clear `cutoff` and dominate every
/// sample within `min_spacing_ghz`
///
/// The exclusion radius is converted to samples with the local spacing of
/// `freqs` at each peak. A sample loses to any neighbour inside the radius
/// that is strictly larger, and to any earlier neighbour that is equal.
pub fn select_peaks(
    freqs: &[f64],
    q_stat: &[f64],
    cutoff: f64,
    min_spacing_ghz: f64,
) -> Vec<usize> {
    let n = q_stat.len().min(freqs.len());
    let mut peaks = Vec::new();
    for k in 0..n {
        let q = q_stat[k];
        if !(q > cutoff) {
            continue;
        }
        let radius = exclusion_radius(freqs, k, min_spacing_ghz, n);
        let lo = k.saturating_sub(radius);
        let hi = (k + radius).min(n - 1);
        let beaten_before = q_stat[lo..k].iter().any(|&other| other >= q);
        let beaten_after = q_stat[k + 1..=hi].iter().any(|&other| other > q);
        if !beaten_before && !beaten_after {
            peaks.push(k);
        }
    }
    peaks
}

fn exclusion_radius(freqs: &[f64], k: usize, min_spacing_ghz: f64, n: usize) -> usize {
    if n < 2 {
        return 0;
    }
    let spacing = if k == 0 {
        freqs[1] - freqs[0]
    } else if k >= n - 1 {
        freqs[n - 1] - freqs[n - 2]
    } else {
        0.5 * (freqs[k + 1] - freqs[k - 1])
    };
    if !(spacing > 0.0) || !(min_spacing_ghz > 0.0) {
        return 0;
    }
    (min_spacing_ghz / spacing).round().min(n as f64) as usize
}

/// Locates candidate resonances in a preprocessed spectrum
#[derive(Debug, Clone, Default)]
pub struct ResonanceDetector {
    config: DetectorConfig,
}

impl ResonanceDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Candidates in ascending frequency order
    ///
    /// # Errors
    /// `InsufficientData` if the trace is shorter than twice the edge
    /// search depth or than the smoothing window.
    pub fn detect(&self, trace: &SpectrumTrace) -> Result<Vec<ResonanceCandidate>> {
        let cfg = &self.config;
        let required = 2 * cfg.edge_search_depth;
        if trace.len() < required {
            return Err(ResfitError::InsufficientData {
                required,
                available: trace.len(),
                context: "resonance detection edge search",
            });
        }

        let stat = quality_statistic(trace, cfg.smoothing_scale_khz, cfg.smoothing_order)?;
        let peaks = select_peaks(
            &stat.freqs,
            &stat.tangential,
            cfg.cutoff_rate,
            khz_to_ghz(cfg.minimum_spacing_khz),
        );
        let candidates: Vec<ResonanceCandidate> = peaks
            .into_iter()
            .map(|k| ResonanceCandidate {
                center_frequency_ghz: stat.freqs[k],
                quality_statistic: stat.tangential[k],
            })
            .collect();

        debug!(
            window = stat.window,
            found = candidates.len(),
            "resonance detection finished"
        );
        Ok(candidates)
    }
}
