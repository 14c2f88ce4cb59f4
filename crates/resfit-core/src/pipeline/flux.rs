use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::{install, BatchSummary, CancelToken, SpectrumAnalysis};
use crate::config::{LambdaConfig, PipelineConfig};
use crate::error::{ResfitError, Result};
use crate::resonator::ResonatorFitParams;
use crate::squid::{fit_lambda, FluxPoint, FluxSweepSeries, SquidLambdaParams};

/// Result of the lambda fit for one resonator
#[derive(Debug, Clone, PartialEq)]
pub enum LambdaOutcome {
    Fitted(SquidLambdaParams),
    Failed {
        resonator_index: usize,
        error: ResfitError,
    },
    Cancelled {
        resonator_index: usize,
    },
}

impl LambdaOutcome {
    pub fn resonator_index(&self) -> usize {
        match self {
            LambdaOutcome::Fitted(p) => p.resonator_index,
            LambdaOutcome::Failed {
                resonator_index, ..
            }
            | LambdaOutcome::Cancelled { resonator_index } => *resonator_index,
        }
    }

    pub fn params(&self) -> Option<&SquidLambdaParams> {
        match self {
            LambdaOutcome::Fitted(p) => Some(p),
            _ => None,
        }
    }
}

/// Lambda outcomes in series order plus their counts
#[derive(Debug, Clone)]
pub struct LambdaBatch {
    pub outcomes: Vec<LambdaOutcome>,
    pub summary: BatchSummary,
}

/// Track resonators across a flux sweep by center frequency
///
/// `sweep` pairs each flux-ramp current (µA) with the analysis of the
/// spectrum taken at that current. Currents are visited in ascending
/// order and each fit joins the series whose latest point lies closest in
/// frequency, within `config.match_tolerance_khz`. A fit with no series in
/// reach starts a new one; a fit whose nearby series were all claimed by
/// closer fits at the same current is excluded. Failed and cancelled fits
/// are left out. Series are indexed in order of their first frequency.
pub fn assemble_flux_series(
    source: &str,
    sweep: &[(f64, SpectrumAnalysis)],
    config: &LambdaConfig,
) -> Vec<FluxSweepSeries> {
    let tolerance_ghz = config.match_tolerance_khz * 1e-6;
    let mut order: Vec<&(f64, SpectrumAnalysis)> = sweep.iter().collect();
    order.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut tracks: Vec<Vec<FluxPoint>> = Vec::new();
    let mut skipped = 0usize;
    let mut excluded = 0usize;
    for (current, analysis) in order {
        let current = *current;
        let mut fits: Vec<&ResonatorFitParams> = Vec::new();
        for outcome in &analysis.outcomes {
            match outcome.params() {
                Some(params) => fits.push(params),
                None => {
                    skipped += 1;
                    debug!(
                        current_ua = current,
                        resonator_index = outcome.resonator_index(),
                        "flux point without a fit excluded"
                    );
                }
            }
        }

        // (distance, track, fit) for every pairing within tolerance
        let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
        for (j, fit) in fits.iter().enumerate() {
            for (t, track) in tracks.iter().enumerate() {
                let Some(last) = track.last() else { continue };
                let distance = (fit.center_frequency_ghz - last.fit.center_frequency_ghz).abs();
                if distance <= tolerance_ghz {
                    pairs.push((distance, t, j));
                }
            }
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut claimed = vec![false; tracks.len()];
        let mut assigned: Vec<Option<usize>> = vec![None; fits.len()];
        for &(_, t, j) in &pairs {
            if !claimed[t] && assigned[j].is_none() {
                claimed[t] = true;
                assigned[j] = Some(t);
            }
        }

        for (j, fit) in fits.iter().enumerate() {
            let point = FluxPoint {
                flux_current_ua: current,
                fit: (*fit).clone(),
            };
            match assigned[j] {
                Some(t) => tracks[t].push(point),
                None if pairs.iter().any(|&(_, _, k)| k == j) => {
                    excluded += 1;
                    debug!(
                        current_ua = current,
                        center_frequency_ghz = fit.center_frequency_ghz,
                        "flux point excluded, nearby series already matched"
                    );
                }
                None => tracks.push(vec![point]),
            }
        }
    }
    if skipped > 0 {
        warn!(source, skipped, "flux points without a successful fit were excluded");
    }
    if excluded > 0 {
        warn!(source, excluded, "flux points that matched no free series were excluded");
    }

    tracks.sort_by(|a, b| first_frequency(a).total_cmp(&first_frequency(b)));
    tracks
        .into_iter()
        .enumerate()
        .map(|(index, points)| FluxSweepSeries::new(index, source, points))
        .collect()
}

fn first_frequency(points: &[FluxPoint]) -> f64 {
    points.first().map_or(f64::INFINITY, |p| p.fit.center_frequency_ghz)
}

/// Fit the SQUID model to each series in parallel
pub fn fit_lambda_batch(
    series: &[FluxSweepSeries],
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<LambdaBatch> {
    let outcomes: Vec<LambdaOutcome> = install(config.workers, || {
        series
            .par_iter()
            .map(|s| {
                let resonator_index = s.resonator_index;
                if cancel.is_cancelled() {
                    return LambdaOutcome::Cancelled { resonator_index };
                }
                match fit_lambda(s, &config.lambda) {
                    Ok(params) => LambdaOutcome::Fitted(params),
                    Err(error) => {
                        warn!(resonator_index, %error, "lambda fit failed");
                        LambdaOutcome::Failed {
                            resonator_index,
                            error,
                        }
                    }
                }
            })
            .collect()
    })?;

    let mut summary = BatchSummary {
        detected: outcomes.len(),
        ..BatchSummary::default()
    };
    for outcome in &outcomes {
        match outcome {
            LambdaOutcome::Fitted(_) => summary.fitted += 1,
            LambdaOutcome::Failed { .. } => summary.failed += 1,
            LambdaOutcome::Cancelled { .. } => summary.cancelled += 1,
        }
    }
    info!(%summary, "lambda fits finished");
    Ok(LambdaBatch { outcomes, summary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FitOutcome;
    use crate::resonator::{ResonatorModel, NPARAMS};

    fn fitted(index: usize, f0: f64) -> FitOutcome {
        let p = [1.0, 0.0, 0.0, 0.0, f0, 5e4, 2e4, 0.0];
        FitOutcome::Fitted(ResonatorFitParams::from_vector(
            ResonatorModel::GainSlopeComplex,
            &p,
            &[None; NPARAMS],
            index,
            "spec",
        ))
    }

    fn analysis(outcomes: Vec<FitOutcome>) -> SpectrumAnalysis {
        SpectrumAnalysis {
            source: "spec".into(),
            candidates: Vec::new(),
            summary: BatchSummary::from_outcomes(&outcomes),
            outcomes,
            baseline: None,
        }
    }

    #[test]
    fn test_assemble_groups_and_sorts() {
        let sweep = vec![
            (20.0, analysis(vec![fitted(0, 4.1000), fitted(1, 4.3000)])),
            (
                0.0,
                analysis(vec![
                    fitted(0, 4.1001),
                    FitOutcome::Failed {
                        resonator_index: 1,
                        center_frequency_ghz: 4.3,
                        error: ResfitError::InvalidSpectrum("bad".into()),
                    },
                ]),
            ),
            (10.0, analysis(vec![fitted(0, 4.1002), fitted(1, 4.3001)])),
        ];
        let series = assemble_flux_series("sweep", &sweep, &LambdaConfig::default());
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].resonator_index, 0);
        assert_eq!(series[0].currents_ua(), vec![0.0, 10.0, 20.0]);
        assert_eq!(series[0].frequencies_ghz(), vec![4.1001, 4.1002, 4.1000]);
        assert_eq!(series[1].resonator_index, 1);
        assert_eq!(series[1].currents_ua(), vec![10.0, 20.0]);
        assert_eq!(series[1].frequencies_ghz(), vec![4.3001, 4.3000]);
        assert_eq!(series[1].source_reference, "sweep");
    }

    #[test]
    fn test_missed_detection_does_not_shift_series() {
        // The 4.1 GHz dip is missed at 10 µA, so the 4.3 GHz fit there
        // carries candidate index 0
        let sweep = vec![
            (0.0, analysis(vec![fitted(0, 4.1000), fitted(1, 4.3000)])),
            (10.0, analysis(vec![fitted(0, 4.3001)])),
            (20.0, analysis(vec![fitted(0, 4.1002), fitted(1, 4.3002)])),
        ];
        let series = assemble_flux_series("sweep", &sweep, &LambdaConfig::default());
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].currents_ua(), vec![0.0, 20.0]);
        assert!(series[0].frequencies_ghz().iter().all(|f| (f - 4.1).abs() < 1e-3));
        assert_eq!(series[1].currents_ua(), vec![0.0, 10.0, 20.0]);
        assert!(series[1].frequencies_ghz().iter().all(|f| (f - 4.3).abs() < 1e-3));
    }

    #[test]
    fn test_out_of_reach_fit_starts_new_series() {
        let sweep = vec![
            (0.0, analysis(vec![fitted(0, 4.1000)])),
            (10.0, analysis(vec![fitted(0, 4.1001), fitted(1, 4.2000)])),
        ];
        let series = assemble_flux_series("sweep", &sweep, &LambdaConfig::default());
        assert_eq!(series.len(), 2);
        assert_eq!(series[1].currents_ua(), vec![10.0]);

        // With a 50 kHz tolerance the 100 kHz step breaks the track
        let tight = LambdaConfig {
            match_tolerance_khz: 50.0,
            ..LambdaConfig::default()
        };
        let series = assemble_flux_series("sweep", &sweep, &tight);
        assert_eq!(series.len(), 3);
    }

    #[test]
    fn test_competing_fit_is_excluded() {
        let sweep = vec![
            (0.0, analysis(vec![fitted(0, 4.1000)])),
            (10.0, analysis(vec![fitted(0, 4.1001), fitted(1, 4.1003)])),
        ];
        let series = assemble_flux_series("sweep", &sweep, &LambdaConfig::default());
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].frequencies_ghz(), vec![4.1000, 4.1001]);
    }

    #[test]
    fn test_short_series_fail_explicitly() {
        let sweep: Vec<(f64, SpectrumAnalysis)> = (0..3)
            .map(|k| (k as f64, analysis(vec![fitted(0, 4.1)])))
            .collect();
        let series = assemble_flux_series("sweep", &sweep, &LambdaConfig::default());
        let batch =
            fit_lambda_batch(&series, &PipelineConfig::default(), &CancelToken::new()).unwrap();
        assert_eq!(batch.summary.failed, 1);
        assert!(matches!(
            batch.outcomes[0],
            LambdaOutcome::Failed {
                resonator_index: 0,
                error: ResfitError::InsufficientData { .. }
            }
        ));
    }
}
