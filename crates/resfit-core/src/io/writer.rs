//! CSV tables of fit outcomes
//!
//! One row per resonator, serialized through `csv::Writer` from fixed row
//! structs. Failed and cancelled rows keep their identity columns, leave
//! the numeric cells empty and carry the reason in the last column. A
//! failed resonator fit still reports the candidate frequency it was
//! attempted at.

use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use super::reader::SpectrumFileError;
use crate::pipeline::{FitOutcome, LambdaOutcome, SpectrumAnalysis};
use crate::resonator::ResonatorFitParams;
use crate::squid::SquidLambdaParams;

/// Columns of the resonator fit table, in [`FitRow`] field order
pub const FIT_COLUMNS: [&str; 23] = [
    "source",
    "resonator_index",
    "status",
    "model",
    "base_amplitude_abs",
    "base_amplitude_abs_error",
    "phase_rad",
    "phase_rad_error",
    "amplitude_slope",
    "amplitude_slope_error",
    "group_delay_ns",
    "group_delay_ns_error",
    "center_frequency_ghz",
    "center_frequency_ghz_error",
    "q_internal",
    "q_internal_error",
    "q_coupled",
    "q_coupled_error",
    "impedance_ratio",
    "impedance_ratio_error",
    "q_total",
    "residual_norm",
    "reason",
];

/// Columns of the lambda fit table, in [`LambdaRow`] field order
pub const LAMBDA_COLUMNS: [&str; 16] = [
    "source",
    "resonator_index",
    "status",
    "i0_fit_ua",
    "i0_fit_ua_error",
    "rate_fit_per_ua",
    "rate_fit_per_ua_error",
    "f2_fit_ghz",
    "f2_fit_ghz_error",
    "modulation_depth_fit_ghz",
    "modulation_depth_fit_ghz_error",
    "lambda_fit",
    "lambda_fit_error",
    "mutual_inductance_ph",
    "residual_norm",
    "reason",
];

#[derive(Debug, Default, Serialize)]
struct FitRow<'a> {
    source: &'a str,
    resonator_index: usize,
    status: &'static str,
    model: Option<&'static str>,
    base_amplitude_abs: Option<f64>,
    base_amplitude_abs_error: Option<f64>,
    phase_rad: Option<f64>,
    phase_rad_error: Option<f64>,
    amplitude_slope: Option<f64>,
    amplitude_slope_error: Option<f64>,
    group_delay_ns: Option<f64>,
    group_delay_ns_error: Option<f64>,
    center_frequency_ghz: Option<f64>,
    center_frequency_ghz_error: Option<f64>,
    q_internal: Option<f64>,
    q_internal_error: Option<f64>,
    q_coupled: Option<f64>,
    q_coupled_error: Option<f64>,
    impedance_ratio: Option<f64>,
    impedance_ratio_error: Option<f64>,
    q_total: Option<f64>,
    residual_norm: Option<f64>,
    reason: String,
}

impl<'a> FitRow<'a> {
    fn fitted(p: &'a ResonatorFitParams) -> Self {
        Self {
            source: &p.source_reference,
            resonator_index: p.resonator_index,
            status: "fitted",
            model: Some(p.model.name()),
            base_amplitude_abs: Some(p.base_amplitude_abs),
            base_amplitude_abs_error: p.base_amplitude_abs_error,
            phase_rad: Some(p.phase_rad),
            phase_rad_error: p.phase_rad_error,
            amplitude_slope: Some(p.amplitude_slope),
            amplitude_slope_error: p.amplitude_slope_error,
            group_delay_ns: Some(p.group_delay_ns),
            group_delay_ns_error: p.group_delay_ns_error,
            center_frequency_ghz: Some(p.center_frequency_ghz),
            center_frequency_ghz_error: p.center_frequency_ghz_error,
            q_internal: Some(p.q_internal),
            q_internal_error: p.q_internal_error,
            q_coupled: Some(p.q_coupled),
            q_coupled_error: p.q_coupled_error,
            impedance_ratio: Some(p.impedance_ratio),
            impedance_ratio_error: p.impedance_ratio_error,
            q_total: Some(p.q_total()),
            residual_norm: Some(p.residual_norm),
            reason: String::new(),
        }
    }

    fn from_outcome(source: &'a str, outcome: &'a FitOutcome) -> Self {
        match outcome {
            FitOutcome::Fitted(p) => Self::fitted(p),
            FitOutcome::Failed {
                resonator_index,
                center_frequency_ghz,
                error,
            } => Self {
                source,
                resonator_index: *resonator_index,
                status: "failed",
                center_frequency_ghz: Some(*center_frequency_ghz),
                reason: error.to_string(),
                ..Self::default()
            },
            FitOutcome::Cancelled { resonator_index } => Self {
                source,
                resonator_index: *resonator_index,
                status: "cancelled",
                ..Self::default()
            },
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct LambdaRow<'a> {
    source: &'a str,
    resonator_index: usize,
    status: &'static str,
    i0_fit_ua: Option<f64>,
    i0_fit_ua_error: Option<f64>,
    rate_fit_per_ua: Option<f64>,
    rate_fit_per_ua_error: Option<f64>,
    f2_fit_ghz: Option<f64>,
    f2_fit_ghz_error: Option<f64>,
    modulation_depth_fit_ghz: Option<f64>,
    modulation_depth_fit_ghz_error: Option<f64>,
    lambda_fit: Option<f64>,
    lambda_fit_error: Option<f64>,
    mutual_inductance_ph: Option<f64>,
    residual_norm: Option<f64>,
    reason: String,
}

impl<'a> LambdaRow<'a> {
    fn fitted(p: &'a SquidLambdaParams) -> Self {
        Self {
            source: &p.source_reference,
            resonator_index: p.resonator_index,
            status: "fitted",
            i0_fit_ua: Some(p.i0_fit),
            i0_fit_ua_error: p.i0_fit_error,
            rate_fit_per_ua: Some(p.rate_fit),
            rate_fit_per_ua_error: p.rate_fit_error,
            f2_fit_ghz: Some(p.f2_fit),
            f2_fit_ghz_error: p.f2_fit_error,
            modulation_depth_fit_ghz: Some(p.modulation_depth_fit),
            modulation_depth_fit_ghz_error: p.modulation_depth_fit_error,
            lambda_fit: Some(p.lambda_fit),
            lambda_fit_error: p.lambda_fit_error,
            mutual_inductance_ph: Some(p.mutual_inductance_ph()),
            residual_norm: Some(p.residual_norm),
            reason: String::new(),
        }
    }

    fn from_outcome(source: &'a str, outcome: &'a LambdaOutcome) -> Self {
        match outcome {
            LambdaOutcome::Fitted(p) => Self::fitted(p),
            LambdaOutcome::Failed {
                resonator_index,
                error,
            } => Self {
                source,
                resonator_index: *resonator_index,
                status: "failed",
                reason: error.to_string(),
                ..Self::default()
            },
            LambdaOutcome::Cancelled { resonator_index } => Self {
                source,
                resonator_index: *resonator_index,
                status: "cancelled",
                ..Self::default()
            },
        }
    }
}

fn csv_writer<W: Write>(writer: W) -> csv::Writer<W> {
    csv::WriterBuilder::new().has_headers(false).from_writer(writer)
}

/// Write the fit outcomes of several spectra to any writer
pub fn write_fit_table<W: Write>(
    writer: W,
    analyses: &[SpectrumAnalysis],
) -> Result<(), SpectrumFileError> {
    let mut wtr = csv_writer(writer);
    wtr.write_record(FIT_COLUMNS)?;
    for analysis in analyses {
        for outcome in &analysis.outcomes {
            wtr.serialize(FitRow::from_outcome(&analysis.source, outcome))?;
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Write lambda outcomes; `source` labels rows that have no fit record
pub fn write_lambda_table<W: Write>(
    writer: W,
    source: &str,
    outcomes: &[LambdaOutcome],
) -> Result<(), SpectrumFileError> {
    let mut wtr = csv_writer(writer);
    wtr.write_record(LAMBDA_COLUMNS)?;
    for outcome in outcomes {
        wtr.serialize(LambdaRow::from_outcome(source, outcome))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write the fit table to a file
pub fn write_fit_file<P: AsRef<Path>>(
    path: P,
    analyses: &[SpectrumAnalysis],
) -> Result<(), SpectrumFileError> {
    write_fit_table(File::create(path)?, analyses)
}

/// Write the lambda table to a file
pub fn write_lambda_file<P: AsRef<Path>>(
    path: P,
    source: &str,
    outcomes: &[LambdaOutcome],
) -> Result<(), SpectrumFileError> {
    write_lambda_table(File::create(path)?, source, outcomes)
}
