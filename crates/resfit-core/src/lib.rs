//! resfit-core: resonance finding and fitting for superconducting resonators
//!
//! Analyzes complex S21 sweeps of notch-coupled resonator arrays: removes
//! cable delay and baseline, finds resonance dips from the phase slope,
//! fits a resonator model to each dip and, across a flux-ramp sweep, fits
//! the rf-SQUID transfer function to the fitted resonance frequencies.
//!
//! ## Modules
//!
//! - `spectrum` - Immutable S21 trace
//! - `preprocess` - Delay, edge gain and baseline ripple removal
//! - `detect` - Phase-slope resonance detector
//! - `resonator` - Resonator model fitting
//! - `squid` - SQUID lambda fitting
//! - `pipeline` - Parallel batch orchestration
//! - `io` - Delimited-text reader and CSV writer
//! - `optimize` - Bounded Levenberg-Marquardt
//! - `math` - Conversions, linear algebra, Savitzky-Golay filter

pub mod config;
pub mod constants;
pub mod detect;
pub mod error;
pub mod frequency;
pub mod io;
pub mod math;
pub mod optimize;
pub mod pipeline;
pub mod preprocess;
pub mod resonator;
pub mod spectrum;
pub mod squid;

pub use config::{DetectorConfig, FitConfig, LambdaConfig, PipelineConfig, PreprocessConfig};
pub use detect::{ResonanceCandidate, ResonanceDetector};
pub use error::{ResfitError, Result};
pub use frequency::FrequencyUnit;
pub use pipeline::{
    analyze_batch, analyze_spectrum, BatchSummary, CancelToken, FitOutcome, LambdaOutcome,
    SpectrumAnalysis,
};
pub use preprocess::Preprocessor;
pub use resonator::{ErrorEstimate, ResonatorFitParams, ResonatorModel, ResonatorModelFitter};
pub use spectrum::SpectrumTrace;
pub use squid::{FluxSweepSeries, SquidLambdaFitter, SquidLambdaParams};
