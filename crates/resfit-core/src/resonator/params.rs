//! Fitted resonator parameter record

use ndarray::Array1;
use num_complex::Complex64;

use super::model::{
    evaluate_point, ResonatorModel, AMPLITUDE, DELAY, F0, IMPEDANCE, NPARAMS, PHASE, QC, QI,
    SLOPE,
};
use crate::error::{ResfitError, Result};

/// Result of one successful resonator fit
///
/// The `*_error` fields are one-sigma uncertainties from the covariance
/// diagonal. `None` means the parameter was held fixed by the model
/// variant, not that the uncertainty is zero.
#[derive(Debug, Clone, PartialEq)]
pub struct ResonatorFitParams {
    pub resonator_index: usize,
    /// Where the data came from (file name, sweep label)
    pub source_reference: String,
    pub model: ResonatorModel,

    pub base_amplitude_abs: f64,
    pub phase_rad: f64,
    pub amplitude_slope: f64,
    pub group_delay_ns: f64,
    pub center_frequency_ghz: f64,
    pub q_internal: f64,
    pub q_coupled: f64,
    pub impedance_ratio: f64,

    pub base_amplitude_abs_error: Option<f64>,
    pub phase_rad_error: Option<f64>,
    pub amplitude_slope_error: Option<f64>,
    pub group_delay_ns_error: Option<f64>,
    pub center_frequency_ghz_error: Option<f64>,
    pub q_internal_error: Option<f64>,
    pub q_coupled_error: Option<f64>,
    pub impedance_ratio_error: Option<f64>,

    /// Weighted residual norm at the solution
    pub residual_norm: f64,
}

impl ResonatorFitParams {
    /// Build a record from a parameter vector in model layout
    pub fn from_vector(
        model: ResonatorModel,
        p: &[f64; NPARAMS],
        errors: &[Option<f64>; NPARAMS],
        resonator_index: usize,
        source_reference: impl Into<String>,
    ) -> Self {
        Self {
            resonator_index,
            source_reference: source_reference.into(),
            model,
            base_amplitude_abs: p[AMPLITUDE],
            phase_rad: p[PHASE],
            amplitude_slope: p[SLOPE],
            group_delay_ns: p[DELAY],
            center_frequency_ghz: p[F0],
            q_internal: p[QI],
            q_coupled: p[QC],
            impedance_ratio: p[IMPEDANCE],
            base_amplitude_abs_error: errors[AMPLITUDE],
            phase_rad_error: errors[PHASE],
            amplitude_slope_error: errors[SLOPE],
            group_delay_ns_error: errors[DELAY],
            center_frequency_ghz_error: errors[F0],
            q_internal_error: errors[QI],
            q_coupled_error: errors[QC],
            impedance_ratio_error: errors[IMPEDANCE],
            residual_norm: 0.0,
        }
    }

    /// Parameters in model layout `[A, φ, slope, τ, f0, Qi, Qc, Z]`
    pub fn to_vector(&self) -> [f64; NPARAMS] {
        [
            self.base_amplitude_abs,
            self.phase_rad,
            self.amplitude_slope,
            self.group_delay_ns,
            self.center_frequency_ghz,
            self.q_internal,
            self.q_coupled,
            self.impedance_ratio,
        ]
    }

    /// Loaded quality factor `1/(1/Qi + 1/Qc)`
    pub fn q_total(&self) -> f64 {
        1.0 / (1.0 / self.q_internal + 1.0 / self.q_coupled)
    }

    /// Regenerate the model curve at `freqs` (GHz)
    pub fn evaluate(&self, freqs: &[f64]) -> Result<Array1<Complex64>> {
        let p = self.to_vector();
        freqs
            .iter()
            .map(|&f| {
                evaluate_point(self.model, &p, f).ok_or_else(|| {
                    ResfitError::InvalidSpectrum(format!(
                        "resonator model undefined at {f} GHz"
                    ))
                })
            })
            .collect()
    }
}

/// Noise-free S21 for a parameter record, used to build synthetic data
pub fn synthesize_s21(params: &ResonatorFitParams, freqs: &[f64]) -> Result<Array1<Complex64>> {
    params.evaluate(freqs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_vector_layout_round_trip() {
        let p = [1.0, 0.1, 2.0, 3.0, 4.1, 5e4, 2e4, -0.5];
        let rec = ResonatorFitParams::from_vector(
            ResonatorModel::GainSlopeComplex,
            &p,
            &[None; NPARAMS],
            2,
            "sweep.csv",
        );
        assert_eq!(rec.to_vector(), p);
        assert_eq!(rec.q_coupled, 2e4);
        assert_eq!(rec.source_reference, "sweep.csv");
        assert_relative_eq!(rec.q_total(), 1.0 / (1.0 / 5e4 + 1.0 / 2e4), epsilon = 1e-9);
    }

    #[test]
    fn test_evaluate_dip() {
        let p = [1.0, 0.0, 0.0, 0.0, 4.1, 5e4, 5e4, 0.0];
        let rec = ResonatorFitParams::from_vector(
            ResonatorModel::Simple,
            &p,
            &[None; NPARAMS],
            0,
            "",
        );
        let s = synthesize_s21(&rec, &[4.09, 4.1, 4.11]).unwrap();
        assert_relative_eq!(s[1].norm(), 0.5, epsilon = 1e-12);
        assert!(s[0].norm() > 0.99);
        assert!(s[2].norm() > 0.99);
    }
}
