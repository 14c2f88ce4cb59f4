//! Linear algebra operations
//!
//! Thin facade over nalgebra so that callers work with ndarray types and
//! the ndarray<->nalgebra conversions stay in one place.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};

/// Result of least squares solve
pub struct LstsqResult {
    pub solution: Vec<f64>,
    pub singular_values: Vec<f64>,
    pub condition: f64,
}

// ============================================================================
// Conversion helpers (internal)
// ============================================================================

/// Convert ndarray Array2<f64> to nalgebra DMatrix<f64>
#[inline]
fn to_na_real(a: &Array2<f64>) -> DMatrix<f64> {
    let (m, n) = a.dim();
    DMatrix::from_fn(m, n, |i, j| a[[i, j]])
}

/// Convert nalgebra DMatrix<f64> to ndarray Array2<f64>
#[inline]
fn from_na_real(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

// ============================================================================
// Matrix inversion
// ============================================================================

/// Invert a real matrix
///
/// Returns None if matrix is singular or non-square.
pub fn inv_real(a: &Array2<f64>) -> Option<Array2<f64>> {
    let (m, n) = a.dim();
    if m != n || m == 0 {
        return None;
    }

    let mat = to_na_real(a);
    mat.try_inverse().map(|inv| from_na_real(&inv))
}

/// Compute `(AᵀA)⁻¹` through the SVD of `A`
///
/// Singular values below `rcond * s_max` make the product singular and
/// return `None` rather than a pseudo-inverse.
pub fn normal_inverse(a: &Array2<f64>, rcond: f64) -> Option<Array2<f64>> {
    let (m, n) = a.dim();
    if m == 0 || n == 0 || m < n {
        return None;
    }

    let svd = to_na_real(a).svd(false, true);
    let v_t = svd.v_t?;
    let s = &svd.singular_values;
    let s_max = s.iter().cloned().fold(0.0, f64::max);
    if !(s_max > 0.0) || s.iter().any(|&x| !x.is_finite() || x <= rcond * s_max) {
        return None;
    }

    // (AᵀA)⁻¹ = V diag(1/s²) Vᵀ
    Some(Array2::from_shape_fn((n, n), |(i, j)| {
        (0..n)
            .map(|k| v_t[(k, i)] * v_t[(k, j)] / (s[k] * s[k]))
            .sum()
    }))
}

// ============================================================================
// Least Squares
// ============================================================================

/// Solve least squares problem Ax = b using SVD
///
/// Returns solution vector, singular values, and condition number.
pub fn lstsq(a: &Array2<f64>, b: &Array1<f64>) -> Result<LstsqResult, &'static str> {
    let (m, n) = a.dim();
    if m == 0 || n == 0 {
        return Err("Empty matrix");
    }
    if b.len() != m {
        return Err("Dimension mismatch");
    }

    let a_na = to_na_real(a);
    let b_na = DVector::from_fn(m, |i, _| b[i]);

    let svd = a_na.svd(true, true);
    let solution = svd.solve(&b_na, 1e-14).map_err(|_| "SVD solve failed")?;
    let x: Vec<f64> = solution.iter().cloned().collect();

    let singular_values: Vec<f64> = svd.singular_values.iter().cloned().collect();
    let condition = match (singular_values.first(), singular_values.last()) {
        (Some(&hi), Some(&lo)) if lo.abs() > 1e-15 => hi / lo,
        _ => f64::INFINITY,
    };

    Ok(LstsqResult {
        solution: x,
        singular_values,
        condition,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_inv_real_identity() {
        let eye = Array2::<f64>::eye(3);
        let inv = inv_real(&eye).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(inv[[i, j]], expected, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_inv_real_singular() {
        let a = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 2.0, 4.0]).unwrap();
        assert!(inv_real(&a).is_none());
    }

    #[test]
    fn test_lstsq_overdetermined() {
        // Solve [1,1; 1,2; 1,3] * x = [1; 2; 3] -> x = [0, 1]
        let a = Array2::from_shape_vec((3, 2), vec![1.0, 1.0, 1.0, 2.0, 1.0, 3.0]).unwrap();
        let b = Array1::from_vec(vec![1.0, 2.0, 3.0]);

        let result = lstsq(&a, &b).unwrap();
        assert_eq!(result.solution.len(), 2);
        assert_relative_eq!(result.solution[0], 0.0, epsilon = 1e-10);
        assert_relative_eq!(result.solution[1], 1.0, epsilon = 1e-10);
        assert!(result.condition < 100.0);
    }

    #[test]
    fn test_normal_inverse_matches_direct() {
        let a = Array2::from_shape_vec((3, 2), vec![1.0, 1.0, 1.0, 2.0, 1.0, 3.0]).unwrap();
        let ata = a.t().dot(&a);
        let direct = inv_real(&ata).unwrap();
        let via_svd = normal_inverse(&a, 1e-13).unwrap();
        for i in 0..2 {
            for j in 0..2 {
                assert_relative_eq!(via_svd[[i, j]], direct[[i, j]], epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_normal_inverse_rank_deficient() {
        // Second column is twice the first
        let a = Array2::from_shape_vec((3, 2), vec![1.0, 2.0, 2.0, 4.0, 3.0, 6.0]).unwrap();
        assert!(normal_inverse(&a, 1e-13).is_none());
    }
}
