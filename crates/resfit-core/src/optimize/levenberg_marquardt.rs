//! Bounded Levenberg-Marquardt
//!
//! Minimizes `½‖r(p)‖²` for problems that supply residuals and an analytic
//! Jacobian. Columns are scaled by their norms (minpack style), each trial
//! point is projected onto the box constraints, and termination follows
//! the minpack `ftol`/`xtol`/`gtol` criteria. Parameters can be held fixed
//! through a free mask; fixed parameters are never touched and get no
//! uncertainty.

use ndarray::{Array1, Array2, Axis};
use tracing::trace;

use super::{Bounds, EvaluationError, LeastSquaresProblem};
use crate::constants::{
    COVARIANCE_RCOND, DEFAULT_FTOL, DEFAULT_GTOL, DEFAULT_MAX_ITERATIONS, DEFAULT_XTOL,
    LM_INITIAL_DAMPING, LM_MAX_DAMPING,
};
use crate::math::linalg::{lstsq, normal_inverse};

/// Why the solver stopped successfully
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Actual and predicted relative cost reductions fell below `ftol`
    CostReduction,
    /// Scaled step fell below `xtol` relative to the scaled parameters
    SmallStep,
    /// Residuals are orthogonal to every Jacobian column within `gtol`
    Orthogonal,
    /// Residual vector is exactly zero
    ZeroResidual,
    /// No downhill step exists at any damping; the current point is kept
    Stalled,
}

/// Solver failure
#[derive(Debug, Clone, PartialEq)]
pub enum LmError {
    /// Residuals or Jacobian could not be evaluated at the starting point
    Evaluation(EvaluationError),
    /// Iteration budget exhausted
    MaxIterations { iterations: usize, residual_norm: f64 },
    /// Cost became non-finite at the starting point
    NonFinite,
    /// Inputs have inconsistent lengths or there is nothing to fit
    Dimension(String),
}

impl std::fmt::Display for LmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LmError::Evaluation(e) => write!(f, "model evaluation failed: {}", e),
            LmError::MaxIterations {
                iterations,
                residual_norm,
            } => write!(
                f,
                "no convergence after {} iterations (residual norm {:.3e})",
                iterations, residual_norm
            ),
            LmError::NonFinite => write!(f, "non-finite cost at starting point"),
            LmError::Dimension(msg) => write!(f, "dimension mismatch: {}", msg),
        }
    }
}

impl std::error::Error for LmError {}

/// Outcome of a successful minimization
#[derive(Debug, Clone)]
pub struct LmReport {
    /// Full parameter vector (fixed entries unchanged)
    pub params: Vec<f64>,
    /// Which entries of `params` were free
    pub free: Vec<bool>,
    /// Residuals at the solution
    pub residuals: Array1<f64>,
    /// `½‖r‖²` at the solution
    pub cost: f64,
    /// Covariance of the free parameters, `(JᵀJ)⁻¹·s²`, `None` if singular
    pub covariance: Option<Array2<f64>>,
    /// Outer iterations performed
    pub iterations: usize,
    /// Residual evaluations performed
    pub evaluations: usize,
    pub termination: Termination,
}

impl LmReport {
    /// `‖r‖` at the solution
    pub fn residual_norm(&self) -> f64 {
        (2.0 * self.cost).sqrt()
    }

    /// One-sigma uncertainties for the full parameter vector
    ///
    /// Fixed parameters map to `None`. Returns `None` altogether when the
    /// covariance matrix is undefined.
    pub fn standard_errors(&self) -> Option<Vec<Option<f64>>> {
        let cov = self.covariance.as_ref()?;
        let mut k = 0;
        Some(
            self.free
                .iter()
                .map(|&is_free| {
                    if is_free {
                        let v = cov[[k, k]];
                        k += 1;
                        Some(v.max(0.0).sqrt())
                    } else {
                        None
                    }
                })
                .collect(),
        )
    }
}

/// Levenberg-Marquardt solver settings
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    pub max_iterations: usize,
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            ftol: DEFAULT_FTOL,
            xtol: DEFAULT_XTOL,
            gtol: DEFAULT_GTOL,
        }
    }
}

impl LevenbergMarquardt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Minimize starting from `initial` (clamped into `bounds` first)
    pub fn minimize<P: LeastSquaresProblem>(
        &self,
        problem: &P,
        initial: &[f64],
        bounds: &Bounds,
        free: &[bool],
    ) -> Result<LmReport, LmError> {
        let n = initial.len();
        if bounds.len() != n || free.len() != n {
            return Err(LmError::Dimension(format!(
                "{} parameters, {} bounds, {} free flags",
                n,
                bounds.len(),
                free.len()
            )));
        }
        let free_idx: Vec<usize> = (0..n).filter(|&i| free[i]).collect();
        let nf = free_idx.len();
        if nf == 0 {
            return Err(LmError::Dimension("no free parameters".into()));
        }

        let mut p = initial.to_vec();
        bounds.clamp(&mut p);

        let mut r = problem.residuals(&p).map_err(LmError::Evaluation)?;
        let m = r.len();
        let mut cost = 0.5 * r.dot(&r);
        if !cost.is_finite() {
            return Err(LmError::NonFinite);
        }
        let mut evaluations = 1;
        let mut lambda = LM_INITIAL_DAMPING;
        let mut diag = vec![0.0_f64; nf];
        let mut iterations = 0;

        let termination = 'outer: loop {
            if cost == 0.0 {
                break Termination::ZeroResidual;
            }
            if iterations >= self.max_iterations {
                return Err(LmError::MaxIterations {
                    iterations,
                    residual_norm: (2.0 * cost).sqrt(),
                });
            }
            iterations += 1;

            let jac = problem.jacobian(&p).map_err(LmError::Evaluation)?;
            let jf = jac.select(Axis(1), &free_idx);

            // Column scaling, non-decreasing across iterations
            for (j, d) in diag.iter_mut().enumerate() {
                let norm = jf.column(j).dot(&jf.column(j)).sqrt();
                let norm = if norm > 0.0 && norm.is_finite() { norm } else { 1.0 };
                *d = d.max(norm);
            }

            let r_norm = (2.0 * cost).sqrt();
            let grad = jf.t().dot(&r);
            let gmax = (0..nf)
                .map(|j| grad[j].abs() / (diag[j] * r_norm))
                .fold(0.0, f64::max);
            if gmax <= self.gtol {
                break Termination::Orthogonal;
            }

            // Ĵ = J·D⁻¹
            let mut js = jf.clone();
            for (j, mut col) in js.axis_iter_mut(Axis(1)).enumerate() {
                col.mapv_inplace(|v| v / diag[j]);
            }

            loop {
                let step = damped_step(&js, &r, lambda);
                let Some(step) = step else {
                    lambda *= 10.0;
                    if lambda > LM_MAX_DAMPING {
                        break 'outer Termination::Stalled;
                    }
                    continue;
                };

                let mut trial = p.clone();
                for (k, &i) in free_idx.iter().enumerate() {
                    trial[i] += step[k] / diag[k];
                }
                bounds.clamp(&mut trial);
                let taken: Vec<f64> = free_idx.iter().map(|&i| trial[i] - p[i]).collect();

                let scaled_step = taken
                    .iter()
                    .zip(&diag)
                    .map(|(s, d)| (s * d).powi(2))
                    .sum::<f64>()
                    .sqrt();
                let scaled_p = free_idx
                    .iter()
                    .zip(&diag)
                    .map(|(&i, d)| (trial[i] * d).powi(2))
                    .sum::<f64>()
                    .sqrt();

                evaluations += 1;
                let trial_r = match problem.residuals(&trial) {
                    Ok(tr) => Some(tr),
                    Err(e) => {
                        trace!(error = %e, lambda, "trial point rejected");
                        None
                    }
                };
                let trial_cost = trial_r.as_ref().map(|tr| 0.5 * tr.dot(tr));

                match (trial_r, trial_cost) {
                    (Some(tr), Some(tc)) if tc.is_finite() && tc < cost => {
                        let predicted_r = &r + &jf.dot(&Array1::from_vec(taken));
                        let predicted_cost = 0.5 * predicted_r.dot(&predicted_r);
                        let actual_red = (cost - tc) / cost;
                        let predicted_red = ((cost - predicted_cost) / cost).abs();

                        p = trial;
                        r = tr;
                        cost = tc;
                        lambda = (lambda / 10.0).max(1e-12);

                        if cost == 0.0 {
                            break 'outer Termination::ZeroResidual;
                        }
                        if actual_red <= self.ftol && predicted_red <= self.ftol {
                            break 'outer Termination::CostReduction;
                        }
                        if scaled_step <= self.xtol * (scaled_p + self.xtol) {
                            break 'outer Termination::SmallStep;
                        }
                        break;
                    }
                    _ => {
                        if scaled_step <= self.xtol * (scaled_p + self.xtol) {
                            break 'outer Termination::SmallStep;
                        }
                        lambda *= 10.0;
                        if lambda > LM_MAX_DAMPING {
                            break 'outer Termination::Stalled;
                        }
                    }
                }
            }
        };

        let covariance = problem.jacobian(&p).ok().and_then(|jac| {
            let jf = jac.select(Axis(1), &free_idx);
            if m <= nf {
                return None;
            }
            let s2 = 2.0 * cost / (m - nf) as f64;
            normal_inverse(&jf, COVARIANCE_RCOND).map(|inv| inv * s2)
        });

        trace!(iterations, evaluations, cost, ?termination, "levenberg-marquardt finished");

        Ok(LmReport {
            params: p,
            free: free.to_vec(),
            residuals: r,
            cost,
            covariance,
            iterations,
            evaluations,
            termination,
        })
    }
}

/// Solve `[Ĵ; √λ·I] δ = [−r; 0]` in the least-squares sense
fn damped_step(js: &Array2<f64>, r: &Array1<f64>, lambda: f64) -> Option<Vec<f64>> {
    let (m, n) = js.dim();
    let sqrt_l = lambda.sqrt();
    let mut a = Array2::<f64>::zeros((m + n, n));
    a.slice_mut(ndarray::s![..m, ..]).assign(js);
    for j in 0..n {
        a[[m + j, j]] = sqrt_l;
    }
    let mut b = Array1::<f64>::zeros(m + n);
    b.slice_mut(ndarray::s![..m]).assign(&r.mapv(|v| -v));

    let sol = lstsq(&a, &b).ok()?;
    if sol.solution.iter().all(|v| v.is_finite()) {
        Some(sol.solution)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// y = a·exp(−b·x) + c
    struct ExpDecay {
        x: Vec<f64>,
        y: Vec<f64>,
    }

    impl LeastSquaresProblem for ExpDecay {
        fn residuals(&self, p: &[f64]) -> Result<Array1<f64>, EvaluationError> {
            Ok(self
                .x
                .iter()
                .zip(&self.y)
                .map(|(&x, &y)| p[0] * (-p[1] * x).exp() + p[2] - y)
                .collect())
        }

        fn jacobian(&self, p: &[f64]) -> Result<Array2<f64>, EvaluationError> {
            Ok(Array2::from_shape_fn((self.x.len(), 3), |(i, j)| {
                let e = (-p[1] * self.x[i]).exp();
                match j {
                    0 => e,
                    1 => -p[0] * self.x[i] * e,
                    _ => 1.0,
                }
            }))
        }
    }

    fn decay_problem() -> ExpDecay {
        let x: Vec<f64> = (0..40).map(|i| i as f64 * 0.1).collect();
        let y = x.iter().map(|&x| 2.5 * (-1.3 * x).exp() + 0.4).collect();
        ExpDecay { x, y }
    }

    #[test]
    fn test_recovers_exact_parameters() {
        let problem = decay_problem();
        let report = LevenbergMarquardt::new()
            .minimize(
                &problem,
                &[1.0, 0.5, 0.0],
                &Bounds::unbounded(3),
                &[true, true, true],
            )
            .unwrap();
        assert_relative_eq!(report.params[0], 2.5, epsilon = 1e-6);
        assert_relative_eq!(report.params[1], 1.3, epsilon = 1e-6);
        assert_relative_eq!(report.params[2], 0.4, epsilon = 1e-6);
        assert!(report.residual_norm() < 1e-6);
    }

    #[test]
    fn test_fixed_parameter_is_untouched() {
        let problem = decay_problem();
        let report = LevenbergMarquardt::new()
            .minimize(
                &problem,
                &[1.0, 1.3, 0.0],
                &Bounds::unbounded(3),
                &[true, false, true],
            )
            .unwrap();
        assert_eq!(report.params[1], 1.3);
        assert_relative_eq!(report.params[0], 2.5, epsilon = 1e-6);
        let errors = report.standard_errors();
        // Zero residual makes s² vanish; fixed parameter has no uncertainty
        if let Some(errors) = errors {
            assert!(errors[1].is_none());
            assert!(errors[0].is_some());
        }
    }

    #[test]
    fn test_bounds_are_respected() {
        let problem = decay_problem();
        let mut bounds = Bounds::unbounded(3);
        bounds.set(2, 0.0, 0.3);
        let report = LevenbergMarquardt::new()
            .minimize(&problem, &[1.0, 0.5, 0.1], &bounds, &[true, true, true])
            .unwrap();
        assert!(report.params[2] <= 0.3);
        assert!(report.params[2] >= 0.0);
    }

    #[test]
    fn test_iteration_cap() {
        let problem = decay_problem();
        let result = LevenbergMarquardt::new().with_max_iterations(1).minimize(
            &problem,
            &[0.1, 5.0, -3.0],
            &Bounds::unbounded(3),
            &[true, true, true],
        );
        assert!(matches!(result, Err(LmError::MaxIterations { iterations: 1, .. })));
    }

    #[test]
    fn test_dimension_mismatch() {
        let problem = decay_problem();
        let result = LevenbergMarquardt::new().minimize(
            &problem,
            &[1.0, 1.0, 1.0],
            &Bounds::unbounded(2),
            &[true, true, true],
        );
        assert!(matches!(result, Err(LmError::Dimension(_))));
    }
}
