//! Bounded least-squares fit of the resonator model to one window

use ndarray::{Array1, Array2};
use num_complex::Complex64;
use tracing::{debug, warn};

use super::guess::{initial_guess, ParameterBounds};
use super::model::{
    evaluate_point, evaluate_with_gradient, resonance_contrast, ErrorEstimate, ResonatorModel,
    AMPLITUDE, F0, IMPEDANCE, NPARAMS, QC, QI,
};
use super::params::ResonatorFitParams;
use crate::config::FitConfig;
use crate::error::{ResfitError, Result};
use crate::optimize::{EvaluationError, LeastSquaresProblem, LevenbergMarquardt, LmError};
use crate::spectrum::SpectrumTrace;

/// Weighted complex residuals stacked as `(Re, Im)` per sample
struct ResonatorProblem<'a> {
    model: ResonatorModel,
    freqs: &'a [f64],
    data: &'a [Complex64],
    inv_sigma: Vec<f64>,
}

impl<'a> ResonatorProblem<'a> {
    fn new(
        model: ResonatorModel,
        error_estimate: ErrorEstimate,
        freqs: &'a [f64],
        data: &'a [Complex64],
    ) -> Self {
        let inv_sigma = data.iter().map(|&z| 1.0 / error_estimate.sigma(z)).collect();
        Self {
            model,
            freqs,
            data,
            inv_sigma,
        }
    }

    fn undefined(k: usize) -> EvaluationError {
        EvaluationError {
            sample: Some(k),
            reason: "resonator model undefined".into(),
        }
    }
}

impl LeastSquaresProblem for ResonatorProblem<'_> {
    fn residuals(&self, params: &[f64]) -> std::result::Result<Array1<f64>, EvaluationError> {
        let mut r = Array1::zeros(2 * self.freqs.len());
        for (k, (&f, &d)) in self.freqs.iter().zip(self.data).enumerate() {
            let s = evaluate_point(self.model, params, f).ok_or_else(|| Self::undefined(k))?;
            let w = self.inv_sigma[k];
            r[2 * k] = (s.re - d.re) * w;
            r[2 * k + 1] = (s.im - d.im) * w;
        }
        Ok(r)
    }

    fn jacobian(&self, params: &[f64]) -> std::result::Result<Array2<f64>, EvaluationError> {
        let mut jac = Array2::zeros((2 * self.freqs.len(), NPARAMS));
        for (k, &f) in self.freqs.iter().enumerate() {
            let (_, grad) =
                evaluate_with_gradient(self.model, params, f).ok_or_else(|| Self::undefined(k))?;
            let w = self.inv_sigma[k];
            for (j, g) in grad.iter().enumerate() {
                jac[[2 * k, j]] = g.re * w;
                jac[[2 * k + 1, j]] = g.im * w;
            }
        }
        Ok(jac)
    }
}

/// Fits the configured resonator model to frequency windows
#[derive(Debug, Clone, Default)]
pub struct ResonatorModelFitter {
    config: FitConfig,
}

impl ResonatorModelFitter {
    pub fn new(config: FitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn fit(
        &self,
        window: &SpectrumTrace,
        resonator_index: usize,
        source_reference: &str,
    ) -> Result<ResonatorFitParams> {
        fit_resonator(window, &self.config, resonator_index, source_reference)
    }
}

/// Fit one resonator in `window`
///
/// # Errors
/// - `InsufficientData` if the window has no more samples than the model
///   has free parameters
/// - `FitDidNotConverge` if the optimizer fails, or its answer is not
///   trustworthy: non-finite parameters, singular covariance, a linewidth
///   wider than the window or narrower than one sample, or a dip
///   shallower than `min_dip_snr` times the residual RMS
pub fn fit_resonator(
    window: &SpectrumTrace,
    config: &FitConfig,
    resonator_index: usize,
    source_reference: &str,
) -> Result<ResonatorFitParams> {
    let model = config.model;
    let required = model.free_count() + 1;
    if window.len() < required {
        return Err(ResfitError::InsufficientData {
            required,
            available: window.len(),
            context: "resonator fit window",
        });
    }

    let (f_min, f_max) = (window.f_min(), window.f_max());
    let not_converged = |residual_norm: f64, reason: String| ResfitError::FitDidNotConverge {
        resonator_index,
        f_min_ghz: f_min,
        f_max_ghz: f_max,
        residual_norm,
        reason,
    };

    let start = initial_guess(window, config)?.to_vector();

    let freqs = window.freqs().to_vec();
    let data = window.s21().to_vec();
    let problem = ResonatorProblem::new(model, config.error_estimate, &freqs, &data);
    let bounds = ParameterBounds::for_window(f_min, f_max);
    let start_norm = problem
        .residuals(&start)
        .map(|r| r.dot(&r).sqrt())
        .unwrap_or(f64::NAN);

    let solver = LevenbergMarquardt::new().with_max_iterations(config.max_iterations);
    let report = solver
        .minimize(&problem, &start, bounds.as_bounds(), &model.free_mask())
        .map_err(|e| {
            let norm = match e {
                LmError::MaxIterations { residual_norm, .. } => residual_norm,
                _ => start_norm,
            };
            not_converged(norm, e.to_string())
        })?;
    let residual_norm = report.residual_norm();

    let mut p = [0.0; NPARAMS];
    p.copy_from_slice(&report.params);
    if p.iter().any(|v| !v.is_finite()) {
        return Err(not_converged(residual_norm, "non-finite parameters".into()));
    }
    let errors = report
        .standard_errors()
        .ok_or_else(|| not_converged(residual_norm, "singular covariance".into()))?;

    let q_total = 1.0 / (1.0 / p[QI] + 1.0 / p[QC]);
    let linewidth = p[F0] / q_total;
    if !(linewidth <= f_max - f_min) {
        return Err(not_converged(
            residual_norm,
            format!(
                "linewidth {:.3} kHz exceeds window span {:.3} kHz",
                linewidth * 1e6,
                (f_max - f_min) * 1e6
            ),
        ));
    }
    // A dip narrower than one sample is not resolved by the data
    if linewidth < window.mean_spacing_ghz() {
        return Err(not_converged(
            residual_norm,
            format!(
                "linewidth {:.3} kHz is below the sample spacing {:.3} kHz",
                linewidth * 1e6,
                window.spacing_khz()
            ),
        ));
    }

    // Unweighted residual RMS against the fitted dip depth
    let rms = {
        let sum: f64 = freqs
            .iter()
            .zip(&data)
            .map(|(&f, &d)| {
                evaluate_point(model, &p, f)
                    .map(|s| (s - d).norm_sqr())
                    .unwrap_or(f64::INFINITY)
            })
            .sum();
        (sum / freqs.len() as f64).sqrt()
    };
    let depth = resonance_contrast(p[QI], p[QC], p[IMPEDANCE])
        .map(|c| p[AMPLITUDE] * c.norm())
        .unwrap_or(0.0);
    if !(depth >= config.min_dip_snr * rms) {
        return Err(not_converged(
            residual_norm,
            format!(
                "dip depth {depth:.3e} below {} x residual rms {rms:.3e}",
                config.min_dip_snr
            ),
        ));
    }

    let mut err = [None; NPARAMS];
    err.copy_from_slice(&errors);
    let mut params =
        ResonatorFitParams::from_vector(model, &p, &err, resonator_index, source_reference);
    params.residual_norm = residual_norm;

    debug!(
        resonator_index,
        f0 = params.center_frequency_ghz,
        qi = params.q_internal,
        qc = params.q_coupled,
        iterations = report.iterations,
        termination = ?report.termination,
        "resonator fitted"
    );
    if report.iterations == config.max_iterations {
        warn!(resonator_index, "resonator fit used its whole iteration budget");
    }
    Ok(params)
}
