//! Pipeline Tests
//!
//! Test coverage:
//! - Batch analysis keeps input order and reports per-spectrum summaries
//! - Cooperative cancellation marks unstarted fits
//! - Flux sweep: spectra -> resonator fits -> series -> lambda fit
//! - CSV output for fitted and failed rows

use resfit_core::frequency::linspace_ghz;
use resfit_core::io::{write_fit_table, write_lambda_table};
use resfit_core::pipeline::{
    analyze_spectrum_with_cancel, assemble_flux_series, fit_lambda_batch,
};
use resfit_core::resonator::evaluate_point;
use resfit_core::squid::resonance_frequency;
use resfit_core::{
    analyze_batch, analyze_spectrum, CancelToken, FitOutcome, LambdaOutcome, PipelineConfig,
    ResfitError, ResonatorModel, SpectrumTrace,
};
use std::f64::consts::PI;

fn dip_trace(freqs: Vec<f64>, dips: &[(f64, f64, f64)]) -> SpectrumTrace {
    let s = freqs
        .iter()
        .map(|&f| {
            dips.iter().fold(num_complex::Complex64::new(1.0, 0.0), |acc, &(f0, qi, qc)| {
                let p = [1.0, 0.0, 0.0, 0.0, f0, qi, qc, 0.0];
                acc * evaluate_point(ResonatorModel::GainSlopeComplex, &p, f).unwrap()
            })
        })
        .collect();
    SpectrumTrace::new(freqs, s).unwrap()
}

#[test]
fn test_batch_preserves_order() {
    let three = dip_trace(
        linspace_ghz(4.0, 4.2, 4001),
        &[(4.02, 3e4, 1.5e4), (4.1, 5e4, 2e4), (4.18, 8e4, 3e4)],
    );
    let one = dip_trace(linspace_ghz(4.0, 4.2, 2001), &[(4.1, 5e4, 2e4)]);
    let inputs = vec![
        ("three".to_string(), three),
        ("one".to_string(), one),
        ("short".to_string(), dip_trace(linspace_ghz(4.0, 4.2, 11), &[])),
    ];
    let config = PipelineConfig {
        workers: Some(2),
        ..Default::default()
    };

    let results = analyze_batch(&inputs, &config, &CancelToken::new()).unwrap();
    assert_eq!(results.len(), 3);

    let three = results[0].as_ref().unwrap();
    assert_eq!(three.source, "three");
    assert_eq!(three.summary.detected, 3);
    assert_eq!(three.summary.fitted, 3);
    let indices: Vec<usize> = three.outcomes.iter().map(FitOutcome::resonator_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    let f0s: Vec<f64> = three.fitted().map(|p| p.center_frequency_ghz).collect();
    for (f, truth) in f0s.iter().zip([4.02, 4.1, 4.18]) {
        assert!((f - truth).abs() < 1e-6);
    }

    let one = results[1].as_ref().unwrap();
    assert_eq!(one.source, "one");
    assert_eq!(one.summary.fitted, 1);

    // Too short for the edge search: the error belongs to that spectrum only
    assert!(results[2].is_err());
}

#[test]
fn test_cancel_before_fitting() {
    let trace = dip_trace(linspace_ghz(4.0, 4.2, 2001), &[(4.1, 5e4, 2e4)]);
    let cancel = CancelToken::new();
    cancel.cancel();
    let analysis =
        analyze_spectrum_with_cancel(&trace, "cancelled", &PipelineConfig::default(), &cancel)
            .unwrap();
    assert_eq!(analysis.candidates.len(), 1);
    assert_eq!(analysis.summary.cancelled, 1);
    assert!(matches!(
        analysis.outcomes[0],
        FitOutcome::Cancelled { resonator_index: 0 }
    ));
}

#[test]
fn test_flux_sweep_end_to_end() {
    let truth = [40.6, 2.0 * PI / 155.0, 4.1, 2e-4, 0.4];
    let mut config = PipelineConfig::default();
    config.fit.fit_half_window_khz = 1000.0;

    let sweep: Vec<_> = (0..36)
        .map(|k| {
            let current = 4.0 * k as f64;
            let f0 = resonance_frequency(&truth, current).unwrap();
            let trace = dip_trace(linspace_ghz(4.098, 4.102, 801), &[(f0, 5e4, 2e4)]);
            let analysis = analyze_spectrum(&trace, &format!("I={current}"), &config).unwrap();
            assert_eq!(analysis.summary.fitted, 1, "current {current}");
            (current, analysis)
        })
        .collect();

    let series = assemble_flux_series("sweep", &sweep, &config.lambda);
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].len(), 36);

    let batch = fit_lambda_batch(&series, &config, &CancelToken::new()).unwrap();
    assert_eq!(batch.summary.fitted, 1);
    let fit = batch.outcomes[0].params().unwrap();
    assert!((fit.lambda_fit / 0.4 - 1.0).abs() < 1e-3);
    assert!((fit.flux_period_ua() / 155.0 - 1.0).abs() < 1e-3);
    assert!((fit.modulation_depth_fit / 2e-4 - 1.0).abs() < 1e-3);
}

#[test]
fn test_tables_mark_failures() {
    let good = dip_trace(linspace_ghz(4.0, 4.2, 2001), &[(4.1, 5e4, 2e4)]);
    let analysis = analyze_spectrum(&good, "good", &PipelineConfig::default()).unwrap();
    let mut buf = Vec::new();
    write_fit_table(&mut buf, &[analysis]).unwrap();
    let text = String::from_utf8(buf).unwrap();
    let rows: Vec<&str> = text.lines().collect();
    assert_eq!(rows.len(), 2);
    assert!(rows[1].starts_with("good,0,fitted,gain_slope_complex,"));

    let outcomes = vec![LambdaOutcome::Failed {
        resonator_index: 2,
        error: ResfitError::LambdaFitDidNotConverge {
            resonator_index: 2,
            current_ua: Some(12.0),
            reason: "phase solve".into(),
        },
    }];
    let mut buf = Vec::new();
    write_lambda_table(&mut buf, "sweep", &outcomes).unwrap();
    let text = String::from_utf8(buf).unwrap();
    let row = text.lines().nth(1).unwrap();
    assert!(row.starts_with("sweep,2,failed,,"));
    assert!(row.contains("12 uA"));
}
