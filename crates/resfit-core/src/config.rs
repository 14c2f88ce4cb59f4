//! Pipeline configuration
//!
//! Every tunable knob lives in [`PipelineConfig`], parsed from TOML with
//! `serde`. Missing sections and fields take their defaults.
//!
//! ```toml
//! workers = 4
//!
//! [preprocess]
//! group_delay_ns = 42.5
//! edge_search_depth = 10
//! baseline_scale_khz = 20000.0
//!
//! [detector]
//! smoothing_scale_khz = 50.0
//! cutoff_rate = 2000.0
//! minimum_spacing_khz = 500.0
//!
//! [fit]
//! model = "gain_slope_complex"
//! error_estimate = "proportional"
//! fit_half_window_khz = 2000.0
//!
//! [lambda]
//! lambda_guess = 0.33
//! match_tolerance_khz = 1000.0
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{
    DEFAULT_EDGE_POINTS, DEFAULT_LAMBDA_GUESS, DEFAULT_MATCH_TOLERANCE_KHZ, DEFAULT_MAX_ITERATIONS,
    DEFAULT_MIN_DIP_SNR, DEFAULT_RATE_GUESS_PER_UA, LAMBDA_MAX, LAMBDA_MIN,
};
use crate::error::{ResfitError, Result};
use crate::preprocess::BaselineMode;
use crate::resonator::{ErrorEstimate, ResonatorModel};

/// Root configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub preprocess: PreprocessConfig,
    pub detector: DetectorConfig,
    pub fit: FitConfig,
    pub lambda: LambdaConfig,
    /// Worker threads for batch fitting; `None` uses the rayon default
    pub workers: Option<usize>,
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ResfitError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot produce a meaningful analysis
    pub fn validate(&self) -> Result<()> {
        self.preprocess.validate()?;
        self.detector.validate()?;
        self.fit.validate()?;
        self.lambda.validate()?;
        if self.workers == Some(0) {
            return Err(invalid("workers must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ResfitError {
    ResfitError::InvalidConfig(msg.into())
}

// =============================================================================
// Preprocessing
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Cable delay to remove, ns; zero skips the step
    pub group_delay_ns: f64,
    /// Edge samples averaged for gain/slope removal; zero skips the step
    pub edge_search_depth: usize,
    /// Ripple smoothing scale, kHz; `None` skips ripple removal
    pub baseline_scale_khz: Option<f64>,
    pub baseline_order: usize,
    pub baseline_mode: BaselineMode,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            group_delay_ns: 0.0,
            edge_search_depth: DEFAULT_EDGE_POINTS,
            baseline_scale_khz: None,
            baseline_order: 3,
            baseline_mode: BaselineMode::RealImag,
        }
    }
}

impl PreprocessConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.group_delay_ns.is_finite() {
            return Err(invalid("preprocess.group_delay_ns must be finite"));
        }
        if let Some(scale) = self.baseline_scale_khz {
            if !(scale > 0.0) || !scale.is_finite() {
                return Err(invalid("preprocess.baseline_scale_khz must be positive"));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Detection
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub smoothing_scale_khz: f64,
    pub smoothing_order: usize,
    /// Minimum phase-slope quality statistic for a candidate
    pub cutoff_rate: f64,
    pub minimum_spacing_khz: f64,
    /// Traces shorter than twice this are rejected
    pub edge_search_depth: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            smoothing_scale_khz: 100.0,
            smoothing_order: 2,
            cutoff_rate: 1000.0,
            minimum_spacing_khz: 500.0,
            edge_search_depth: DEFAULT_EDGE_POINTS,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.smoothing_scale_khz > 0.0) || !self.smoothing_scale_khz.is_finite() {
            return Err(invalid("detector.smoothing_scale_khz must be positive"));
        }
        if !self.cutoff_rate.is_finite() {
            return Err(invalid("detector.cutoff_rate must be finite"));
        }
        if !(self.minimum_spacing_khz >= 0.0) || !self.minimum_spacing_khz.is_finite() {
            return Err(invalid("detector.minimum_spacing_khz must be non-negative"));
        }
        Ok(())
    }
}

// =============================================================================
// Resonator fit
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub model: ResonatorModel,
    pub error_estimate: ErrorEstimate,
    /// Half-width of the window sliced around each candidate, kHz
    pub fit_half_window_khz: f64,
    /// Edge samples averaged for the gain/phase guesses
    pub edge_points: usize,
    pub max_iterations: usize,
    /// Fitted dip depth must exceed this multiple of the residual RMS
    pub min_dip_snr: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            model: ResonatorModel::GainSlopeComplex,
            error_estimate: ErrorEstimate::Proportional,
            fit_half_window_khz: 2000.0,
            edge_points: DEFAULT_EDGE_POINTS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            min_dip_snr: DEFAULT_MIN_DIP_SNR,
        }
    }
}

impl FitConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.fit_half_window_khz > 0.0) || !self.fit_half_window_khz.is_finite() {
            return Err(invalid("fit.fit_half_window_khz must be positive"));
        }
        if self.edge_points == 0 {
            return Err(invalid("fit.edge_points must be at least 1"));
        }
        if self.max_iterations == 0 {
            return Err(invalid("fit.max_iterations must be at least 1"));
        }
        if !(self.min_dip_snr >= 0.0) {
            return Err(invalid("fit.min_dip_snr must be non-negative"));
        }
        Ok(())
    }
}

// =============================================================================
// Lambda fit
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LambdaConfig {
    /// Starting flux-ramp rate, rad/µA
    pub rate_guess_per_ua: f64,
    pub lambda_guess: f64,
    pub max_iterations: usize,
    /// A fit joins a resonator's series when its center frequency lies
    /// within this distance of the series' previous point
    pub match_tolerance_khz: f64,
}

impl Default for LambdaConfig {
    fn default() -> Self {
        Self {
            rate_guess_per_ua: DEFAULT_RATE_GUESS_PER_UA,
            lambda_guess: DEFAULT_LAMBDA_GUESS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            match_tolerance_khz: DEFAULT_MATCH_TOLERANCE_KHZ,
        }
    }
}

impl LambdaConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.rate_guess_per_ua > 0.0) || !self.rate_guess_per_ua.is_finite() {
            return Err(invalid("lambda.rate_guess_per_ua must be positive"));
        }
        if !(self.lambda_guess >= LAMBDA_MIN && self.lambda_guess <= LAMBDA_MAX) {
            return Err(invalid(format!(
                "lambda.lambda_guess must lie in [{LAMBDA_MIN}, {LAMBDA_MAX}]"
            )));
        }
        if self.max_iterations == 0 {
            return Err(invalid("lambda.max_iterations must be at least 1"));
        }
        if !(self.match_tolerance_khz > 0.0) || !self.match_tolerance_khz.is_finite() {
            return Err(invalid("lambda.match_tolerance_khz must be positive"));
        }
        Ok(())
    }
}
