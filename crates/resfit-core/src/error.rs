//! Error taxonomy shared by every stage of the pipeline

use thiserror::Error;

/// Errors produced by preprocessing, detection and fitting
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResfitError {
    /// A window or search-depth parameter does not fit the supplied data
    #[error("invalid window: {parameter} = {value} does not fit {len} samples")]
    InvalidWindow {
        parameter: &'static str,
        value: usize,
        len: usize,
    },

    /// The trace is too short for the requested operation
    #[error("insufficient data: need at least {required} samples, got {available} ({context})")]
    InsufficientData {
        required: usize,
        available: usize,
        context: &'static str,
    },

    /// The trace itself is malformed (unsorted, non-finite, length mismatch)
    #[error("invalid spectrum: {0}")]
    InvalidSpectrum(String),

    /// The resonator-model optimizer failed or produced an untrustworthy answer
    #[error(
        "resonator fit did not converge for resonator {resonator_index} \
         in [{f_min_ghz:.6}, {f_max_ghz:.6}] GHz: {reason} (residual norm {residual_norm:.3e})"
    )]
    FitDidNotConverge {
        resonator_index: usize,
        f_min_ghz: f64,
        f_max_ghz: f64,
        residual_norm: f64,
        reason: String,
    },

    /// The SQUID lambda fit failed (outer fit or inner phase solve)
    #[error("lambda fit did not converge for resonator {resonator_index}: {reason}{}",
        .current_ua.map(|i| format!(" (at {i} uA)")).unwrap_or_default())]
    LambdaFitDidNotConverge {
        resonator_index: usize,
        current_ua: Option<f64>,
        reason: String,
    },

    /// Unrecognized frequency unit string
    #[error("unrecognized frequency unit: {0:?}")]
    FrequencyUnit(String),

    /// Configuration values that cannot work together
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// TOML configuration could not be parsed
    #[error("configuration parse error: {0}")]
    Config(String),

    /// Work was abandoned through a cancellation token before it started
    #[error("cancelled before {0} started")]
    Cancelled(&'static str),
}

impl From<toml::de::Error> for ResfitError {
    fn from(e: toml::de::Error) -> Self {
        ResfitError::Config(e.to_string())
    }
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, ResfitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lambda_error_mentions_current() {
        let e = ResfitError::LambdaFitDidNotConverge {
            resonator_index: 3,
            current_ua: Some(12.5),
            reason: "phase solve".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("resonator 3"));
        assert!(msg.contains("12.5 uA"));

        let e = ResfitError::LambdaFitDidNotConverge {
            resonator_index: 3,
            current_ua: None,
            reason: "max iterations".into(),
        };
        assert!(!e.to_string().contains("uA"));
    }

    #[test]
    fn test_fit_error_reports_window() {
        let e = ResfitError::FitDidNotConverge {
            resonator_index: 7,
            f_min_ghz: 4.098,
            f_max_ghz: 4.102,
            residual_norm: 0.5,
            reason: "singular covariance".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("4.098000"));
        assert!(msg.contains("singular covariance"));
    }
}
