//! Nonlinear least-squares optimization
//!
//! The resonator and SQUID fitters both describe themselves as a
//! [`LeastSquaresProblem`] (residual vector plus analytic Jacobian) and
//! hand it to the bounded [`LevenbergMarquardt`] solver.

mod levenberg_marquardt;

use ndarray::{Array1, Array2};

pub use levenberg_marquardt::{LevenbergMarquardt, LmError, LmReport, Termination};

/// Failure to evaluate a model at a given parameter vector
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationError {
    /// Index of the data point that could not be evaluated, if known
    pub sample: Option<usize>,
    pub reason: String,
}

impl std::fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.sample {
            Some(i) => write!(f, "{} (sample {})", self.reason, i),
            None => write!(f, "{}", self.reason),
        }
    }
}

impl std::error::Error for EvaluationError {}

/// A problem of the form `min ½‖r(p)‖²`
pub trait LeastSquaresProblem {
    /// Residual vector at `params`
    fn residuals(&self, params: &[f64]) -> Result<Array1<f64>, EvaluationError>;

    /// Jacobian `∂r_i/∂p_j` at `params`, shape (residuals, all parameters)
    fn jacobian(&self, params: &[f64]) -> Result<Array2<f64>, EvaluationError>;
}

/// Box constraints `lower[i] <= p[i] <= upper[i]`
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    /// Bounds from explicit (lower, upper) pairs
    pub fn new(pairs: &[(f64, f64)]) -> Self {
        Self {
            lower: pairs.iter().map(|p| p.0).collect(),
            upper: pairs.iter().map(|p| p.1).collect(),
        }
    }

    /// `n` parameters with no constraints
    pub fn unbounded(n: usize) -> Self {
        Self {
            lower: vec![f64::NEG_INFINITY; n],
            upper: vec![f64::INFINITY; n],
        }
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Replace the bounds of parameter `i`
    pub fn set(&mut self, i: usize, lower: f64, upper: f64) {
        self.lower[i] = lower;
        self.upper[i] = upper;
    }

    /// Project `params` onto the box; out-of-range values land exactly on
    /// the nearest bound
    pub fn clamp(&self, params: &mut [f64]) {
        for ((p, &lo), &hi) in params.iter_mut().zip(&self.lower).zip(&self.upper) {
            if *p < lo {
                *p = lo;
            } else if *p > hi {
                *p = hi;
            }
        }
    }

    /// True if every entry of `params` lies inside the box
    pub fn contains(&self, params: &[f64]) -> bool {
        params
            .iter()
            .zip(&self.lower)
            .zip(&self.upper)
            .all(|((&p, &lo), &hi)| p >= lo && p <= hi)
    }
}
