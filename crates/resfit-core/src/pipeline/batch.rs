use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::{install, BatchSummary, CancelToken, FitOutcome, SpectrumAnalysis};
use crate::config::PipelineConfig;
use crate::detect::{ResonanceCandidate, ResonanceDetector};
use crate::error::{ResfitError, Result};
use crate::frequency::khz_to_ghz;
use crate::preprocess::Preprocessor;
use crate::resonator::ResonatorModelFitter;
use crate::spectrum::SpectrumTrace;

/// Preprocess, detect and fit every resonance in one spectrum
///
/// Preprocessing and detection errors are returned; fit failures become
/// [`FitOutcome::Failed`] entries.
pub fn analyze_spectrum(
    trace: &SpectrumTrace,
    source: &str,
    config: &PipelineConfig,
) -> Result<SpectrumAnalysis> {
    analyze_spectrum_with_cancel(trace, source, config, &CancelToken::new())
}

/// [`analyze_spectrum`] with cooperative cancellation between candidates
pub fn analyze_spectrum_with_cancel(
    trace: &SpectrumTrace,
    source: &str,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<SpectrumAnalysis> {
    install(config.workers, || analyze_in_pool(trace, source, config, cancel))?
}

/// Analyze many spectra, one `Result` per input in input order
///
/// Spectra not yet started when `cancel` fires report
/// [`ResfitError::Cancelled`]. The outer `Err` only signals that the
/// worker pool could not be built.
pub fn analyze_batch(
    inputs: &[(String, SpectrumTrace)],
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<Vec<Result<SpectrumAnalysis>>> {
    install(config.workers, || {
        inputs
            .par_iter()
            .map(|(source, trace)| {
                if cancel.is_cancelled() {
                    return Err(ResfitError::Cancelled("spectrum analysis"));
                }
                analyze_in_pool(trace, source, config, cancel)
            })
            .collect()
    })
}

fn analyze_in_pool(
    trace: &SpectrumTrace,
    source: &str,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<SpectrumAnalysis> {
    let preprocessed = Preprocessor::new(config.preprocess.clone()).run(trace)?;
    let candidates = ResonanceDetector::new(config.detector.clone()).detect(&preprocessed.trace)?;
    debug!(source, found = candidates.len(), "candidates detected");

    let fitter = ResonatorModelFitter::new(config.fit.clone());
    let half_width = khz_to_ghz(config.fit.fit_half_window_khz);
    let outcomes: Vec<FitOutcome> = candidates
        .par_iter()
        .enumerate()
        .map(|(index, candidate)| {
            if cancel.is_cancelled() {
                return FitOutcome::Cancelled {
                    resonator_index: index,
                };
            }
            fit_candidate(
                &fitter,
                &preprocessed.trace,
                candidate,
                index,
                half_width,
                source,
            )
        })
        .collect();

    let summary = BatchSummary::from_outcomes(&outcomes);
    info!(source, %summary, "spectrum analyzed");
    Ok(SpectrumAnalysis {
        source: source.to_string(),
        candidates,
        outcomes,
        baseline: preprocessed.baseline,
        summary,
    })
}

fn fit_candidate(
    fitter: &ResonatorModelFitter,
    trace: &SpectrumTrace,
    candidate: &ResonanceCandidate,
    index: usize,
    half_width_ghz: f64,
    source: &str,
) -> FitOutcome {
    let center = candidate.center_frequency_ghz;
    let result = trace
        .window(center, half_width_ghz)
        .and_then(|window| fitter.fit(&window, index, source));
    match result {
        Ok(params) => FitOutcome::Fitted(params),
        Err(error) => {
            warn!(source, resonator_index = index, center_ghz = center, %error, "fit failed");
            FitOutcome::Failed {
                resonator_index: index,
                center_frequency_ghz: center,
                error,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    fn flat_trace(n: usize) -> SpectrumTrace {
        let freqs = crate::frequency::linspace_ghz(4.0, 4.2, n);
        SpectrumTrace::new(freqs, vec![Complex64::new(1.0, 0.0); n]).unwrap()
    }

    #[test]
    fn test_flat_spectrum_yields_empty_analysis() {
        let analysis = analyze_spectrum(&flat_trace(401), "flat", &PipelineConfig::default()).unwrap();
        assert!(analysis.candidates.is_empty());
        assert_eq!(analysis.summary, BatchSummary::default());
        assert_eq!(analysis.source, "flat");
    }

    #[test]
    fn test_detection_error_propagates() {
        let r = analyze_spectrum(&flat_trace(12), "short", &PipelineConfig::default());
        assert!(r.is_err());
    }

    #[test]
    fn test_cancelled_batch_reports_each_spectrum() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let inputs = vec![
            ("a".to_string(), flat_trace(401)),
            ("b".to_string(), flat_trace(401)),
        ];
        let results = analyze_batch(&inputs, &PipelineConfig::default(), &cancel).unwrap();
        assert_eq!(results.len(), 2);
        for r in results {
            assert!(matches!(r, Err(ResfitError::Cancelled(_))));
        }
    }
}
