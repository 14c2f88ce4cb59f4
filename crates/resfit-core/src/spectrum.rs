//! Complex transmission trace over frequency
//!
//! A [`SpectrumTrace`] is an immutable, strictly increasing sequence of
//! (frequency in GHz, complex S21) samples. Every processing step
//! produces a new derived trace instead of mutating in place.

use ndarray::{s, Array1};
use num_complex::Complex64;

use crate::error::{ResfitError, Result};
use crate::frequency::ghz_to_khz;

/// A swept S21 measurement
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumTrace {
    /// Frequencies in GHz, strictly increasing
    freqs: Array1<f64>,
    /// Complex transmission at each frequency
    s21: Array1<Complex64>,
}

impl SpectrumTrace {
    /// Build a trace, checking ordering and finiteness
    pub fn new(freqs: Vec<f64>, s21: Vec<Complex64>) -> Result<Self> {
        Self::from_arrays(Array1::from_vec(freqs), Array1::from_vec(s21))
    }

    /// Build a trace from ndarray vectors
    pub fn from_arrays(freqs: Array1<f64>, s21: Array1<Complex64>) -> Result<Self> {
        if freqs.len() != s21.len() {
            return Err(ResfitError::InvalidSpectrum(format!(
                "{} frequencies but {} S21 samples",
                freqs.len(),
                s21.len()
            )));
        }
        if freqs.len() < 2 {
            return Err(ResfitError::InsufficientData {
                required: 2,
                available: freqs.len(),
                context: "spectrum trace",
            });
        }
        if let Some(i) = freqs.iter().position(|f| !f.is_finite()) {
            return Err(ResfitError::InvalidSpectrum(format!(
                "non-finite frequency at sample {i}"
            )));
        }
        if let Some(i) = s21.iter().position(|z| !z.re.is_finite() || !z.im.is_finite()) {
            return Err(ResfitError::InvalidSpectrum(format!(
                "non-finite S21 at sample {i}"
            )));
        }
        if let Some(i) = freqs.windows(2).into_iter().position(|w| w[1] <= w[0]) {
            return Err(ResfitError::InvalidSpectrum(format!(
                "frequencies not strictly increasing at sample {}",
                i + 1
            )));
        }
        Ok(Self { freqs, s21 })
    }

    /// Frequencies in GHz
    #[inline]
    pub fn freqs(&self) -> &Array1<f64> {
        &self.freqs
    }

    /// Complex S21 samples
    #[inline]
    pub fn s21(&self) -> &Array1<Complex64> {
        &self.s21
    }

    /// Number of samples
    #[inline]
    pub fn len(&self) -> usize {
        self.freqs.len()
    }

    /// Always false for a constructed trace; present for API symmetry
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.freqs.is_empty()
    }

    /// Lowest frequency (GHz)
    #[inline]
    pub fn f_min(&self) -> f64 {
        self.freqs[0]
    }

    /// Highest frequency (GHz)
    #[inline]
    pub fn f_max(&self) -> f64 {
        self.freqs[self.len() - 1]
    }

    /// Total span (GHz)
    #[inline]
    pub fn span_ghz(&self) -> f64 {
        self.f_max() - self.f_min()
    }

    /// Average sample spacing in GHz
    pub fn mean_spacing_ghz(&self) -> f64 {
        self.span_ghz() / (self.len() - 1) as f64
    }

    /// Average sample spacing in kHz
    pub fn spacing_khz(&self) -> f64 {
        ghz_to_khz(self.mean_spacing_ghz())
    }

    /// Spacing around sample `i` (centred difference, one-sided at the ends)
    pub fn local_spacing_ghz(&self, i: usize) -> f64 {
        let n = self.len();
        let f = &self.freqs;
        if i == 0 {
            f[1] - f[0]
        } else if i >= n - 1 {
            f[n - 1] - f[n - 2]
        } else {
            (f[i + 1] - f[i - 1]) / 2.0
        }
    }

    /// Derived trace sharing this trace's frequencies
    pub fn with_s21(&self, s21: Array1<Complex64>) -> Self {
        debug_assert_eq!(s21.len(), self.len());
        Self {
            freqs: self.freqs.clone(),
            s21,
        }
    }

    /// Derived trace with every sample transformed by `f(freq, s21)`
    pub fn map_s21<F>(&self, f: F) -> Self
    where
        F: Fn(f64, Complex64) -> Complex64,
    {
        let s21 = self
            .freqs
            .iter()
            .zip(self.s21.iter())
            .map(|(&fr, &z)| f(fr, z))
            .collect();
        self.with_s21(s21)
    }

    /// Sub-trace with `|f - center| <= half_width`
    ///
    /// Fails with `InsufficientData` if fewer than two samples fall inside.
    pub fn window(&self, center_ghz: f64, half_width_ghz: f64) -> Result<Self> {
        let lo = center_ghz - half_width_ghz;
        let hi = center_ghz + half_width_ghz;
        let freqs = self.freqs.as_slice().unwrap_or(&[]);
        let start = freqs.partition_point(|&f| f < lo);
        let stop = freqs.partition_point(|&f| f <= hi);
        let available = stop.saturating_sub(start);
        if available < 2 {
            return Err(ResfitError::InsufficientData {
                required: 2,
                available,
                context: "fit window",
            });
        }
        Ok(Self {
            freqs: self.freqs.slice(s![start..stop]).to_owned(),
            s21: self.s21.slice(s![start..stop]).to_owned(),
        })
    }

    /// |S21|² for every sample
    pub fn power(&self) -> Array1<f64> {
        self.s21.mapv(|z| z.norm_sqr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frequency::linspace_ghz;
    use approx::assert_relative_eq;

    fn flat(n: usize) -> SpectrumTrace {
        let f = linspace_ghz(4.0, 4.2, n);
        let s = vec![Complex64::new(1.0, 0.0); n];
        SpectrumTrace::new(f, s).unwrap()
    }

    #[test]
    fn test_rejects_unsorted() {
        let r = SpectrumTrace::new(
            vec![1.0, 3.0, 2.0],
            vec![Complex64::new(1.0, 0.0); 3],
        );
        assert!(matches!(r, Err(ResfitError::InvalidSpectrum(_))));
    }

    #[test]
    fn test_rejects_length_mismatch() {
        let r = SpectrumTrace::new(vec![1.0, 2.0], vec![Complex64::new(1.0, 0.0)]);
        assert!(matches!(r, Err(ResfitError::InvalidSpectrum(_))));
    }

    #[test]
    fn test_rejects_single_sample() {
        let r = SpectrumTrace::new(vec![1.0], vec![Complex64::new(1.0, 0.0)]);
        assert!(matches!(r, Err(ResfitError::InsufficientData { .. })));
    }

    #[test]
    fn test_spacing() {
        let t = flat(2001);
        assert_relative_eq!(t.mean_spacing_ghz(), 1e-4, epsilon = 1e-12);
        assert_relative_eq!(t.spacing_khz(), 100.0, epsilon = 1e-6);
        assert_relative_eq!(t.local_spacing_ghz(0), 1e-4, epsilon = 1e-12);
        assert_relative_eq!(t.local_spacing_ghz(1000), 1e-4, epsilon = 1e-12);
    }

    #[test]
    fn test_window() {
        let t = flat(2001);
        let w = t.window(4.1, 0.00205).unwrap();
        assert_eq!(w.len(), 41);
        assert!(w.f_min() >= 4.09795);
        assert!(w.f_max() <= 4.10205);

        let err = t.window(5.0, 0.001);
        assert!(matches!(err, Err(ResfitError::InsufficientData { .. })));
    }
}
