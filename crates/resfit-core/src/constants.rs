//! Numerical and physical constants
//!
//! Tolerances used by the detector and the fitters, default solver
//! settings, and the flux quantum used to turn a fitted flux-ramp
//! rate into a mutual inductance.

/// Tolerance for detecting near-zero values in division and singularity checks.
pub const NEAR_ZERO: f64 = 1e-15;

/// Relative singular-value cutoff used when inverting `JᵀJ` for the
/// covariance matrix. Singular values below `COVARIANCE_RCOND * s_max`
/// make the covariance undefined.
pub const COVARIANCE_RCOND: f64 = 1e-13;

/// Minpack default for relative cost reduction (sqrt of machine epsilon).
pub const DEFAULT_FTOL: f64 = 1.49012e-8;

/// Minpack default for relative parameter change.
pub const DEFAULT_XTOL: f64 = 1.49012e-8;

/// Orthogonality tolerance between residual vector and Jacobian columns.
pub const DEFAULT_GTOL: f64 = 1e-12;

/// Initial Levenberg-Marquardt damping factor.
pub const LM_INITIAL_DAMPING: f64 = 1e-3;

/// Damping factor above which a step is considered impossible.
pub const LM_MAX_DAMPING: f64 = 1e16;

/// Default outer iteration cap for the resonator fit.
pub const DEFAULT_MAX_ITERATIONS: usize = 200;

/// Default number of edge samples averaged for gain/phase guesses.
pub const DEFAULT_EDGE_POINTS: usize = 10;

/// Default ratio between fitted dip depth and residual RMS below which a
/// fit is reported as not converged.
pub const DEFAULT_MIN_DIP_SNR: f64 = 10.0;

/// Inner SQUID phase solve: absolute tolerance on `phi` (radians).
pub const PHASE_SOLVE_TOL: f64 = 1e-13;

/// Inner SQUID phase solve: iteration cap.
pub const PHASE_SOLVE_MAX_ITER: usize = 100;

/// Lambda fit: default flux-ramp rate guess in rad/µA (π per 90 µA).
///
/// Heuristic, not derived from data: assumes the sweep spans roughly
/// 0.5 to 1.5 flux quanta.
pub const DEFAULT_RATE_GUESS_PER_UA: f64 = std::f64::consts::PI / 90.0;

/// Lambda fit: default starting value for the SQUID nonlinearity.
pub const DEFAULT_LAMBDA_GUESS: f64 = 0.33;

/// Flux assembly: largest center-frequency step (kHz) between successive
/// currents that still counts as the same resonator.
pub const DEFAULT_MATCH_TOLERANCE_KHZ: f64 = 1000.0;

/// Lambda fit: lower and upper bound on lambda.
pub const LAMBDA_MIN: f64 = 1e-4;
pub const LAMBDA_MAX: f64 = 0.99;

/// Magnetic flux quantum h/2e (Wb).
pub const FLUX_QUANTUM: f64 = 2.067_833_848e-15;
