//! Frequency units and conversions
//!
//! All internal frequency math is done in GHz. Physical widths given in
//! kHz (smoothing scales, minimum spacings, fit windows) are converted
//! with [`khz_to_ghz`] so that the conversion factor lives in one place.

use std::str::FromStr;

use crate::error::ResfitError;

/// Frequency unit enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrequencyUnit {
    Hz,
    KHz,
    MHz,
    #[default]
    GHz,
    THz,
}

impl FrequencyUnit {
    /// Get the multiplier to convert to Hz
    pub fn multiplier(&self) -> f64 {
        match self {
            FrequencyUnit::Hz => 1.0,
            FrequencyUnit::KHz => 1e3,
            FrequencyUnit::MHz => 1e6,
            FrequencyUnit::GHz => 1e9,
            FrequencyUnit::THz => 1e12,
        }
    }

    /// Lower-case label as used in config files and on the command line
    pub fn label(&self) -> &'static str {
        match self {
            FrequencyUnit::Hz => "hz",
            FrequencyUnit::KHz => "khz",
            FrequencyUnit::MHz => "mhz",
            FrequencyUnit::GHz => "ghz",
            FrequencyUnit::THz => "thz",
        }
    }
}

impl FromStr for FrequencyUnit {
    type Err = ResfitError;

    /// Parse from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hz" => Ok(FrequencyUnit::Hz),
            "khz" => Ok(FrequencyUnit::KHz),
            "mhz" => Ok(FrequencyUnit::MHz),
            "ghz" => Ok(FrequencyUnit::GHz),
            "thz" => Ok(FrequencyUnit::THz),
            _ => Err(ResfitError::FrequencyUnit(s.to_string())),
        }
    }
}

/// Convert a frequency value between units
#[inline]
pub fn convert(value: f64, from: FrequencyUnit, to: FrequencyUnit) -> f64 {
    value * from.multiplier() / to.multiplier()
}

/// Convert a value in kHz to GHz
#[inline]
pub fn khz_to_ghz(khz: f64) -> f64 {
    khz / 1e6
}

/// Convert a value in GHz to kHz
#[inline]
pub fn ghz_to_khz(ghz: f64) -> f64 {
    ghz * 1e6
}

/// Evenly spaced frequency grid in GHz (inclusive endpoints)
pub fn linspace_ghz(start: f64, stop: f64, npoints: usize) -> Vec<f64> {
    match npoints {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (npoints - 1) as f64;
            (0..npoints).map(|i| start + i as f64 * step).collect()
        }
    }
}
