//! Resonator model fitting
//!
//! Given a frequency window around one resonance, fits the complex
//! transmission model of a notch-coupled resonator (gain, gain slope,
//! cable delay, asymmetric coupling) by bounded Levenberg-Marquardt and
//! reports one-sigma uncertainties from the covariance.
//!
//! ## Modules
//!
//! - `model` - Model variants, evaluation and analytic gradient
//! - `params` - Fitted parameter record
//! - `guess` - Data-driven starting point, FWHM helper, box constraints
//! - `fitter` - Least-squares problem and post-fit sanity checks

mod fitter;
mod guess;
mod model;
mod params;

pub use fitter::{fit_resonator, ResonatorModelFitter};
pub use guess::{fwhm, initial_guess, InitialGuess, ParameterBounds};
pub use model::{evaluate_point, evaluate_with_gradient, ErrorEstimate, ResonatorModel, NPARAMS};
pub use params::{synthesize_s21, ResonatorFitParams};
