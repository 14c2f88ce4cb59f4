//! Savitzky-Golay polynomial smoothing and differentiation
//!
//! Fits a polynomial of degree `p` to a sliding window of `2m+1` samples.
//! Interior samples use the centred least-squares coefficients; the first
//! and last `m` samples evaluate the polynomial fitted to the first/last
//! full window at the appropriate offset, so edges are neither mirrored
//! nor zero-padded.
//!
//! Reference: Savitzky & Golay, "Smoothing and Differentiation of Data
//! by Simplified Least Squares Procedures" (Analytical Chemistry, 1964).

use ndarray::Array2;

use super::linalg::inv_real;
use crate::error::{ResfitError, Result};

/// Number of samples spanned by `scale_khz` before odd/order forcing
pub fn raw_window_length(scale_khz: f64, spacing_khz: f64) -> usize {
    if !(spacing_khz > 0.0) || !scale_khz.is_finite() || scale_khz <= 0.0 {
        return 0;
    }
    let n = (scale_khz / spacing_khz).round();
    if n.is_finite() && n > 0.0 {
        n as usize
    } else {
        0
    }
}

/// Savitzky-Golay window length for a physical smoothing scale
///
/// `round(scale / spacing)`, raised to at least `order + 1` and then to
/// the next odd integer. The result is always odd and `>= order + 1`.
pub fn window_length(scale_khz: f64, spacing_khz: f64, order: usize) -> usize {
    let mut n = raw_window_length(scale_khz, spacing_khz).max(order + 1);
    if n % 2 == 0 {
        n += 1;
    }
    n
}

/// Savitzky-Golay filter with cached least-squares projector
#[derive(Debug, Clone)]
pub struct SavitzkyGolay {
    half_width: usize,
    poly_order: usize,
    /// `(JᵀJ)⁻¹Jᵀ` for the normalized Vandermonde matrix, shape (p+1, 2m+1)
    projector: Array2<f64>,
    /// Centred smoothing coefficients
    centre: Vec<f64>,
}

impl SavitzkyGolay {
    /// Create a filter for an odd `window` and polynomial `poly_order`
    pub fn new(window: usize, poly_order: usize) -> Result<Self> {
        if window % 2 == 0 || window <= poly_order {
            return Err(ResfitError::InvalidWindow {
                parameter: "savitzky_golay_window",
                value: window,
                len: poly_order + 1,
            });
        }
        let m = window / 2;
        let p = poly_order + 1;
        let scale = m.max(1) as f64;

        // J[i][k] = x̃_i^k with x̃ = (i - m) / m in [-1, 1]
        let j = Array2::from_shape_fn((window, p), |(i, k)| {
            ((i as f64 - m as f64) / scale).powi(k as i32)
        });
        let jtj = j.t().dot(&j);
        let inv = inv_real(&jtj).ok_or(ResfitError::InvalidWindow {
            parameter: "savitzky_golay_window",
            value: window,
            len: p,
        })?;
        let projector = inv.dot(&j.t());

        let mut sg = Self {
            half_width: m,
            poly_order,
            projector,
            centre: Vec::new(),
        };
        sg.centre = sg.coefficients_at(0.0, 0);
        Ok(sg)
    }

    /// Window size (2m+1)
    pub fn window_size(&self) -> usize {
        2 * self.half_width + 1
    }

    /// Polynomial order
    pub fn poly_order(&self) -> usize {
        self.poly_order
    }

    /// Coefficients evaluating the `deriv`-th derivative (per sample) of the
    /// window polynomial at `offset` samples from the window centre
    pub fn coefficients_at(&self, offset: f64, deriv: usize) -> Vec<f64> {
        let window = self.window_size();
        let scale = self.half_width.max(1) as f64;
        let x0 = offset / scale;

        // d^deriv/dx̃^deriv of x̃^k at x0, times (1/scale)^deriv for per-sample units
        let basis: Vec<f64> = (0..=self.poly_order)
            .map(|k| {
                if k < deriv {
                    0.0
                } else {
                    let falling: f64 = ((k - deriv + 1)..=k).map(|v| v as f64).product();
                    falling * x0.powi((k - deriv) as i32)
                }
            })
            .collect();
        let unit = scale.powi(deriv as i32);

        (0..window)
            .map(|i| {
                basis
                    .iter()
                    .enumerate()
                    .map(|(k, b)| b * self.projector[[k, i]])
                    .sum::<f64>()
                    / unit
            })
            .collect()
    }

    /// Smoothed copy of `data`
    pub fn smooth(&self, data: &[f64]) -> Result<Vec<f64>> {
        self.apply(data, 0)
    }

    /// First derivative of `data` with respect to the abscissa, for
    /// uniform sample spacing `dx`
    pub fn derivative(&self, data: &[f64], dx: f64) -> Result<Vec<f64>> {
        Ok(self.apply(data, 1)?.into_iter().map(|v| v / dx).collect())
    }

    fn apply(&self, data: &[f64], deriv: usize) -> Result<Vec<f64>> {
        let n = data.len();
        let w = self.window_size();
        let m = self.half_width;
        if n < w {
            return Err(ResfitError::InsufficientData {
                required: w,
                available: n,
                context: "savitzky-golay window",
            });
        }

        let centre = if deriv == 0 {
            self.centre.clone()
        } else {
            self.coefficients_at(0.0, deriv)
        };
        let dot = |coeffs: &[f64], start: usize| -> f64 {
            coeffs
                .iter()
                .zip(&data[start..start + w])
                .map(|(c, y)| c * y)
                .sum()
        };

        let mut out = vec![0.0; n];
        for i in m..n - m {
            out[i] = dot(&centre, i - m);
        }
        for i in 0..m {
            let head = self.coefficients_at(i as f64 - m as f64, deriv);
            out[i] = dot(&head, 0);
            let tail = self.coefficients_at(m as f64 - i as f64, deriv);
            out[n - 1 - i] = dot(&tail, n - w);
        }
        Ok(out)
    }
}
