//! Lambda fit of resonance frequency against flux-ramp current

use ndarray::{Array1, Array2};
use std::f64::consts::PI;
use tracing::debug;

use super::model::{
    frequency_with_gradient, resonance_frequency, DEPTH, F2, I0, LAMBDA, NPARAMS, RATE,
};
use crate::config::LambdaConfig;
use crate::constants::{FLUX_QUANTUM, LAMBDA_MAX, LAMBDA_MIN};
use crate::error::{ResfitError, Result};
use crate::optimize::{Bounds, EvaluationError, LeastSquaresProblem, LevenbergMarquardt, LmError};
use crate::resonator::ResonatorFitParams;

/// Fewest flux points accepted by the lambda fit
pub const MIN_FLUX_POINTS: usize = 6;

/// One resonator fit at one flux-ramp current
#[derive(Debug, Clone, PartialEq)]
pub struct FluxPoint {
    pub flux_current_ua: f64,
    pub fit: ResonatorFitParams,
}

/// Resonator fits for a single resonator, sorted by flux-ramp current
#[derive(Debug, Clone, PartialEq)]
pub struct FluxSweepSeries {
    pub resonator_index: usize,
    /// Identifies the flux sweep (manifest path, power setting)
    pub source_reference: String,
    points: Vec<FluxPoint>,
}

impl FluxSweepSeries {
    /// Build a series; points are sorted by current
    pub fn new(
        resonator_index: usize,
        source_reference: impl Into<String>,
        mut points: Vec<FluxPoint>,
    ) -> Self {
        points.sort_by(|a, b| a.flux_current_ua.total_cmp(&b.flux_current_ua));
        Self {
            resonator_index,
            source_reference: source_reference.into(),
            points,
        }
    }

    pub fn points(&self) -> &[FluxPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn currents_ua(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.flux_current_ua).collect()
    }

    pub fn frequencies_ghz(&self) -> Vec<f64> {
        self.points
            .iter()
            .map(|p| p.fit.center_frequency_ghz)
            .collect()
    }
}

/// Fitted SQUID transfer-function parameters for one resonator
#[derive(Debug, Clone, PartialEq)]
pub struct SquidLambdaParams {
    pub resonator_index: usize,
    pub source_reference: String,
    /// Current of maximum frequency, µA
    pub i0_fit: f64,
    /// Flux-ramp rate, rad/µA
    pub rate_fit: f64,
    /// Midpoint frequency, GHz
    pub f2_fit: f64,
    /// Peak-to-peak modulation, GHz
    pub modulation_depth_fit: f64,
    pub lambda_fit: f64,
    pub i0_fit_error: Option<f64>,
    pub rate_fit_error: Option<f64>,
    pub f2_fit_error: Option<f64>,
    pub modulation_depth_fit_error: Option<f64>,
    pub lambda_fit_error: Option<f64>,
    pub residual_norm: f64,
}

impl SquidLambdaParams {
    pub fn to_vector(&self) -> [f64; NPARAMS] {
        [
            self.i0_fit,
            self.rate_fit,
            self.f2_fit,
            self.modulation_depth_fit,
            self.lambda_fit,
        ]
    }

    /// Model frequencies (GHz) at the given currents (µA)
    pub fn evaluate(&self, currents_ua: &[f64]) -> Result<Vec<f64>> {
        let p = self.to_vector();
        currents_ua
            .iter()
            .map(|&i| {
                resonance_frequency(&p, i).ok_or(ResfitError::LambdaFitDidNotConverge {
                    resonator_index: self.resonator_index,
                    current_ua: Some(i),
                    reason: "phase solve failed".into(),
                })
            })
            .collect()
    }

    /// Flux-ramp current for one flux quantum, µA
    pub fn flux_period_ua(&self) -> f64 {
        2.0 * PI / self.rate_fit
    }

    /// Mutual inductance between flux ramp and SQUID, pH
    pub fn mutual_inductance_ph(&self) -> f64 {
        FLUX_QUANTUM / (self.flux_period_ua() * 1e-6) * 1e12
    }
}

struct LambdaProblem<'a> {
    currents: &'a [f64],
    freqs: &'a [f64],
}

impl LeastSquaresProblem for LambdaProblem<'_> {
    fn residuals(&self, params: &[f64]) -> std::result::Result<Array1<f64>, EvaluationError> {
        self.currents
            .iter()
            .zip(self.freqs)
            .enumerate()
            .map(|(k, (&i, &f))| {
                resonance_frequency(params, i)
                    .map(|model| model - f)
                    .ok_or_else(|| phase_failure(k))
            })
            .collect()
    }

    fn jacobian(&self, params: &[f64]) -> std::result::Result<Array2<f64>, EvaluationError> {
        let mut jac = Array2::zeros((self.currents.len(), NPARAMS));
        for (k, &i) in self.currents.iter().enumerate() {
            let (_, grad) = frequency_with_gradient(params, i).ok_or_else(|| phase_failure(k))?;
            for (j, g) in grad.iter().enumerate() {
                jac[[k, j]] = *g;
            }
        }
        Ok(jac)
    }
}

fn phase_failure(k: usize) -> EvaluationError {
    EvaluationError {
        sample: Some(k),
        reason: "SQUID phase solve did not converge".into(),
    }
}

/// Data-driven starting point `[I0, rate, f2, P, λ]`
///
/// `P` and `f2` come from the frequency extremes, `I0` is the current of
/// the highest frequency. The rate and λ guesses are fixed heuristics
/// taken from `config`.
pub fn lambda_initial_guess(series: &FluxSweepSeries, config: &LambdaConfig) -> [f64; NPARAMS] {
    let currents = series.currents_ua();
    let freqs = series.frequencies_ghz();
    let (imax, fmax) = freqs
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or((0, 0.0));
    let fmin = freqs.iter().copied().fold(f64::INFINITY, f64::min);

    let mut p = [0.0; NPARAMS];
    p[I0] = currents.get(imax).copied().unwrap_or(0.0);
    p[RATE] = config.rate_guess_per_ua;
    p[F2] = 0.5 * (fmax + fmin);
    p[DEPTH] = fmax - fmin;
    p[LAMBDA] = config.lambda_guess;
    p
}

/// Shift `i0` by whole flux periods into `[min current, min current + period)`
///
/// The model is periodic in `i0`, so the optimizer may land on any maximum.
fn reduce_to_first_period(i0: f64, rate: f64, currents: &[f64]) -> f64 {
    let period = 2.0 * PI / rate;
    let Some(start) = currents.first().copied() else {
        return i0;
    };
    if !period.is_finite() || period <= 0.0 {
        return i0;
    }
    start + (i0 - start).rem_euclid(period)
}

/// Fit the SQUID model to a flux sweep
///
/// # Errors
/// - `InsufficientData` for fewer than [`MIN_FLUX_POINTS`] points
/// - `LambdaFitDidNotConverge` if the optimizer fails, the covariance is
///   singular, or the inner phase solve fails at the starting point (the
///   offending current is reported)
pub fn fit_lambda(series: &FluxSweepSeries, config: &LambdaConfig) -> Result<SquidLambdaParams> {
    let resonator_index = series.resonator_index;
    if series.len() < MIN_FLUX_POINTS {
        return Err(ResfitError::InsufficientData {
            required: MIN_FLUX_POINTS,
            available: series.len(),
            context: "flux sweep series",
        });
    }

    let currents = series.currents_ua();
    let freqs = series.frequencies_ghz();
    let problem = LambdaProblem {
        currents: &currents,
        freqs: &freqs,
    };

    let mut bounds = Bounds::unbounded(NPARAMS);
    bounds.set(RATE, 0.0, f64::INFINITY);
    bounds.set(DEPTH, 0.0, f64::INFINITY);
    bounds.set(LAMBDA, LAMBDA_MIN, LAMBDA_MAX);

    let start = lambda_initial_guess(series, config);
    let failed = |current_ua: Option<f64>, reason: String| ResfitError::LambdaFitDidNotConverge {
        resonator_index,
        current_ua,
        reason,
    };

    let report = LevenbergMarquardt::new()
        .with_max_iterations(config.max_iterations)
        .minimize(&problem, &start, &bounds, &[true; NPARAMS])
        .map_err(|e| {
            let current = match &e {
                LmError::Evaluation(EvaluationError {
                    sample: Some(k), ..
                }) => currents.get(*k).copied(),
                _ => None,
            };
            failed(current, e.to_string())
        })?;

    let p = &report.params;
    if p.iter().any(|v| !v.is_finite()) {
        return Err(failed(None, "non-finite parameters".into()));
    }
    let errors = report
        .standard_errors()
        .ok_or_else(|| failed(None, "singular covariance".into()))?;

    let params = SquidLambdaParams {
        resonator_index,
        source_reference: series.source_reference.clone(),
        i0_fit: reduce_to_first_period(p[I0], p[RATE], &currents),
        rate_fit: p[RATE],
        f2_fit: p[F2],
        modulation_depth_fit: p[DEPTH],
        lambda_fit: p[LAMBDA],
        i0_fit_error: errors[I0],
        rate_fit_error: errors[RATE],
        f2_fit_error: errors[F2],
        modulation_depth_fit_error: errors[DEPTH],
        lambda_fit_error: errors[LAMBDA],
        residual_norm: report.residual_norm(),
    };
    debug!(
        resonator_index,
        lambda = params.lambda_fit,
        iterations = report.iterations,
        "lambda fitted"
    );
    Ok(params)
}
