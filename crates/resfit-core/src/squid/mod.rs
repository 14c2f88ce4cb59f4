//! SQUID lambda fitting
//!
//! An rf-SQUID coupled to a resonator pulls its frequency periodically
//! with applied flux. Fitting the resonance frequency of one resonator
//! against flux-ramp current yields the screening parameter λ, the flux
//! period and the modulation depth.

mod fitter;
mod model;

use crate::config::LambdaConfig;
use crate::error::Result;

pub use fitter::{
    fit_lambda, lambda_initial_guess, FluxPoint, FluxSweepSeries, SquidLambdaParams,
    MIN_FLUX_POINTS,
};
pub use model::{frequency_with_gradient, resonance_frequency, solve_phase, transfer, NPARAMS};

/// Fits the SQUID model to flux sweeps with a fixed configuration
#[derive(Debug, Clone, Default)]
pub struct SquidLambdaFitter {
    config: LambdaConfig,
}

impl SquidLambdaFitter {
    pub fn new(config: LambdaConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LambdaConfig {
        &self.config
    }

    pub fn fit(&self, series: &FluxSweepSeries) -> Result<SquidLambdaParams> {
        fit_lambda(series, &self.config)
    }
}
