//! Preprocessing Tests
//!
//! Test coverage:
//! - Delay and edge gain removal on a realistic resonance sweep
//! - Fitting the corrected trace
//! - Baseline outcome reporting through the preprocessor

use num_complex::Complex64;
use resfit_core::frequency::linspace_ghz;
use resfit_core::preprocess::BaselineOutcome;
use resfit_core::resonator::{evaluate_point, fit_resonator};
use resfit_core::{FitConfig, PreprocessConfig, Preprocessor, ResonatorModel, SpectrumTrace};
use std::f64::consts::PI;

const DIP: [f64; 8] = [1.0, 0.0, 0.0, 0.0, 4.1, 5e4, 2e4, 0.0];

fn ideal_dip(f: f64) -> Complex64 {
    evaluate_point(ResonatorModel::GainSlopeComplex, &DIP, f).unwrap()
}

/// Dip behind a cable of `tau_ns` and a complex amplifier gain
fn measured(freqs: &[f64], tau_ns: f64, gain: Complex64) -> SpectrumTrace {
    let s = freqs
        .iter()
        .map(|&f| gain * Complex64::from_polar(1.0, -2.0 * PI * f * tau_ns) * ideal_dip(f))
        .collect();
    SpectrumTrace::new(freqs.to_vec(), s).unwrap()
}

#[test]
fn test_delay_and_gain_removed() {
    let freqs = linspace_ghz(4.0, 4.2, 2001);
    let raw = measured(&freqs, 42.5, Complex64::from_polar(2.0, 0.7));

    let config = PreprocessConfig {
        group_delay_ns: 42.5,
        ..Default::default()
    };
    let out = Preprocessor::new(config).run(&raw).unwrap();
    assert!(out.baseline.is_none());

    for (&f, z) in out.trace.freqs().iter().zip(out.trace.s21().iter()) {
        assert!(
            (z - ideal_dip(f)).norm() < 5e-3,
            "sample at {f} GHz off by {}",
            (z - ideal_dip(f)).norm()
        );
    }
}

#[test]
fn test_corrected_trace_fits() {
    let freqs = linspace_ghz(4.098, 4.102, 401);
    let raw = measured(&freqs, 42.5, Complex64::from_polar(0.3, -1.2));
    let config = PreprocessConfig {
        group_delay_ns: 42.5,
        ..Default::default()
    };
    let out = Preprocessor::new(config).run(&raw).unwrap();

    let fit = fit_resonator(&out.trace, &FitConfig::default(), 0, "corrected").unwrap();
    assert!((fit.center_frequency_ghz - 4.1).abs() < 1e-6);
    assert!((fit.q_internal / 5e4 - 1.0).abs() < 0.01);
    assert!((fit.q_coupled / 2e4 - 1.0).abs() < 0.01);
}

#[test]
fn test_baseline_outcome_is_reported() {
    let freqs = linspace_ghz(4.0, 4.2, 201);
    let raw = measured(&freqs, 0.0, Complex64::new(1.0, 0.0));

    // 2 MHz at 1 MHz spacing is too short for a cubic baseline
    let short = PreprocessConfig {
        baseline_scale_khz: Some(2_000.0),
        ..Default::default()
    };
    let out = Preprocessor::new(short).run(&raw).unwrap();
    assert!(matches!(out.baseline, Some(BaselineOutcome::Skipped { .. })));

    let wide = PreprocessConfig {
        baseline_scale_khz: Some(51_000.0),
        ..Default::default()
    };
    let out = Preprocessor::new(wide).run(&raw).unwrap();
    assert_eq!(out.baseline, Some(BaselineOutcome::Applied { window: 51 }));
    assert_eq!(out.trace.len(), raw.len());
}

#[test]
fn test_edge_depth_too_large_is_an_error() {
    let freqs = linspace_ghz(4.0, 4.2, 15);
    let raw = measured(&freqs, 0.0, Complex64::new(1.0, 0.0));
    let config = PreprocessConfig {
        edge_search_depth: 8,
        ..Default::default()
    };
    assert!(Preprocessor::new(config).run(&raw).is_err());
}
