//! Delimited-text spectrum reader
//!
//! Accepts three numeric columns per line, separated by commas, tabs,
//! semicolons or spaces (sniffed from the first line): frequency followed by either real/imaginary parts or
//! dB magnitude and phase in degrees. Lines starting with `#` or `!` are
//! comments; a single non-numeric line before the data is taken as a
//! header.

use num_complex::Complex64;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::error::ResfitError;
use crate::frequency::{convert, FrequencyUnit};
use crate::math::conversions::dbdeg_2_reim;
use crate::spectrum::SpectrumTrace;

/// Spectrum and manifest file errors
#[derive(Error, Debug)]
pub enum SpectrumFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("No data rows found")]
    Empty,

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Spectrum(#[from] ResfitError),
}

/// Column layout after the frequency column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpectrumFormat {
    /// `freq, re, im`
    #[default]
    RealImag,
    /// `freq, |S21| dB, phase degrees`
    DbDegrees,
}

impl FromStr for SpectrumFormat {
    type Err = ResfitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ri" | "real_imag" => Ok(SpectrumFormat::RealImag),
            "db" | "db_degrees" => Ok(SpectrumFormat::DbDegrees),
            other => Err(ResfitError::InvalidConfig(format!(
                "unknown spectrum format {other:?}"
            ))),
        }
    }
}

/// How to interpret a spectrum file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpectrumReader {
    pub format: SpectrumFormat,
    /// Unit of the frequency column; values are converted to GHz
    pub unit: FrequencyUnit,
}

impl SpectrumReader {
    pub fn new(format: SpectrumFormat, unit: FrequencyUnit) -> Self {
        Self { format, unit }
    }

    /// Read a spectrum file
    pub fn from_file<P: AsRef<Path>>(&self, path: P) -> Result<SpectrumTrace, SpectrumFileError> {
        let content = fs::read_to_string(path)?;
        self.parse(&content)
    }

    /// Parse spectrum text already in memory
    pub fn from_str(&self, content: &str) -> Result<SpectrumTrace, SpectrumFileError> {
        self.parse(content)
    }

    fn parse(&self, content: &str) -> Result<SpectrumTrace, SpectrumFileError> {
        let mut freqs = Vec::new();
        let mut s21 = Vec::new();
        let mut header_seen = false;

        for (line, fields) in delimited_records(content)? {
            let values: Option<Vec<f64>> = fields.iter().map(|f| f.parse().ok()).collect();
            let values = match values {
                Some(v) => v,
                None if !header_seen && freqs.is_empty() => {
                    header_seen = true;
                    continue;
                }
                None => {
                    return Err(SpectrumFileError::Parse {
                        line,
                        message: format!("non-numeric field in {fields:?}"),
                    })
                }
            };
            if values.len() < 3 {
                return Err(SpectrumFileError::Parse {
                    line,
                    message: format!("expected 3 columns, found {}", values.len()),
                });
            }

            freqs.push(convert(values[0], self.unit, FrequencyUnit::GHz));
            s21.push(match self.format {
                SpectrumFormat::RealImag => Complex64::new(values[1], values[2]),
                SpectrumFormat::DbDegrees => dbdeg_2_reim(values[1], values[2]),
            });
        }

        if freqs.is_empty() {
            return Err(SpectrumFileError::Empty);
        }
        Ok(SpectrumTrace::new(freqs, s21)?)
    }
}

/// Delimiter of the first data or header line: comma, tab, semicolon, else space
fn sniff_delimiter(content: &str) -> u8 {
    let first = content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('!'))
        .unwrap_or_default();
    [b',', b'\t', b';']
        .into_iter()
        .find(|d| first.as_bytes().contains(d))
        .unwrap_or(b' ')
}

/// Non-comment records of `content` with their 1-based line numbers
///
/// Empty fields are dropped so that runs of spaces act as one separator.
fn delimited_records(content: &str) -> Result<Vec<(usize, Vec<String>)>, SpectrumFileError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .delimiter(sniff_delimiter(content))
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let fields: Vec<String> = record
            .iter()
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        match fields.first() {
            None => continue,
            Some(f) if f.starts_with('#') || f.starts_with('!') => continue,
            Some(_) => {}
        }
        let line = record.position().map_or(0, |p| p.line() as usize);
        rows.push((line, fields));
    }
    Ok(rows)
}

/// One line of a flux-sweep manifest
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub current_ua: f64,
    pub path: String,
}

/// Parse `current_ua,path` lines; comments and a header are allowed
pub fn parse_flux_manifest(content: &str) -> Result<Vec<ManifestEntry>, SpectrumFileError> {
    let mut entries = Vec::new();
    for (line, fields) in delimited_records(content)? {
        let [current, path @ ..] = fields.as_slice() else {
            continue;
        };
        if path.is_empty() {
            return Err(SpectrumFileError::Parse {
                line,
                message: "expected `current_ua,path`".into(),
            });
        }
        match current.parse::<f64>() {
            Ok(current_ua) => entries.push(ManifestEntry {
                current_ua,
                path: path.join(" "),
            }),
            Err(_) if entries.is_empty() => continue,
            Err(_) => {
                return Err(SpectrumFileError::Parse {
                    line,
                    message: format!("invalid current {current:?}"),
                })
            }
        }
    }
    if entries.is_empty() {
        return Err(SpectrumFileError::Empty);
    }
    Ok(entries)
}
