//! Batch orchestration
//!
//! Runs preprocess → detect → fit over one or many spectra and the lambda
//! fit over flux sweeps. Work items are independent and fanned out with
//! rayon; results keep input order. Per-resonator failures are recorded
//! as explicit outcomes, while preprocessing or detection failures abort
//! the spectrum they belong to.
//!
//! ## Modules
//!
//! - `batch` - Spectrum analysis and per-candidate fitting
//! - `flux` - Flux series assembly and batch lambda fitting

mod batch;
mod flux;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::detect::ResonanceCandidate;
use crate::error::{ResfitError, Result};
use crate::preprocess::BaselineOutcome;
use crate::resonator::ResonatorFitParams;

pub use batch::{analyze_batch, analyze_spectrum, analyze_spectrum_with_cancel};
pub use flux::{assemble_flux_series, fit_lambda_batch, LambdaBatch, LambdaOutcome};

/// Shared flag for cooperative cancellation
///
/// Checked between work items; a fit that has started always runs to
/// completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result of fitting one detected candidate
#[derive(Debug, Clone, PartialEq)]
pub enum FitOutcome {
    Fitted(ResonatorFitParams),
    Failed {
        resonator_index: usize,
        center_frequency_ghz: f64,
        error: ResfitError,
    },
    Cancelled {
        resonator_index: usize,
    },
}

impl FitOutcome {
    pub fn resonator_index(&self) -> usize {
        match self {
            FitOutcome::Fitted(p) => p.resonator_index,
            FitOutcome::Failed {
                resonator_index, ..
            }
            | FitOutcome::Cancelled { resonator_index } => *resonator_index,
        }
    }

    pub fn params(&self) -> Option<&ResonatorFitParams> {
        match self {
            FitOutcome::Fitted(p) => Some(p),
            _ => None,
        }
    }
}

/// Counts of what happened to the work items of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Work items considered (candidates or flux series)
    pub detected: usize,
    pub fitted: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[FitOutcome]) -> Self {
        let mut summary = Self {
            detected: outcomes.len(),
            ..Self::default()
        };
        for outcome in outcomes {
            match outcome {
                FitOutcome::Fitted(_) => summary.fitted += 1,
                FitOutcome::Failed { .. } => summary.failed += 1,
                FitOutcome::Cancelled { .. } => summary.cancelled += 1,
            }
        }
        summary
    }
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} detected, {} fitted, {} failed, {} cancelled",
            self.detected, self.fitted, self.failed, self.cancelled
        )
    }
}

/// Everything learned from one spectrum
#[derive(Debug, Clone)]
pub struct SpectrumAnalysis {
    pub source: String,
    /// Ascending in frequency; `outcomes[i]` belongs to `candidates[i]`
    pub candidates: Vec<ResonanceCandidate>,
    pub outcomes: Vec<FitOutcome>,
    pub baseline: Option<BaselineOutcome>,
    pub summary: BatchSummary,
}

impl SpectrumAnalysis {
    /// Successful fits in candidate order
    pub fn fitted(&self) -> impl Iterator<Item = &ResonatorFitParams> {
        self.outcomes.iter().filter_map(FitOutcome::params)
    }
}

/// Run `op` on a pool of `workers` threads, or on the global pool
fn install<R, F>(workers: Option<usize>, op: F) -> Result<R>
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    match workers {
        None => Ok(op()),
        Some(n) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| ResfitError::InvalidConfig(format!("worker pool: {e}")))?;
            Ok(pool.install(op))
        }
    }
}
