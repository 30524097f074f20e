//! Linear algebra helpers for covariance factorization and inversion.
//!
//! Public API:
//!     pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64>
//!     pub fn cholesky_lower(matrix: &DMatrix<f64>, what: &'static str) -> Result<DMatrix<f64>>
//!     pub fn spd_inverse(matrix: &DMatrix<f64>, what: &'static str) -> Result<DMatrix<f64>>
//!     pub fn min_eigenvalue(matrix: &DMatrix<f64>) -> f64
//!
//! Unlike a jittered square root, these helpers never modify the matrix they are given
//! beyond removing round-off asymmetry. A covariance that cannot be factored is reported
//! to the caller as a [FilterError] so that divergence is visible instead of hidden.

use nalgebra::DMatrix;
use nalgebra::linalg::{Cholesky, SymmetricEigen};

use crate::{FilterError, Result};

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
///
/// Simple matrix symmetrization function that reduces round-off errors associated
/// with floating point arithmetic.
///
/// # Arguments
/// * `m` - the matrix to symmetrize
///
/// # Returns
/// A symmetrized version of the input matrix.
#[inline]
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    0.5 * (m + m.transpose())
}

/// Lower triangular Cholesky factor L such that P = L Lᵀ.
///
/// The matrix is symmetrized first. Fails with [FilterError::NotPositiveDefinite] when
/// the factorization does not exist and with [FilterError::NonFinite] when the input
/// holds NaN or infinite entries.
///
/// # Arguments
/// * `matrix` - square, symmetric positive definite matrix
/// * `what` - name of the matrix, used in the error
pub fn cholesky_lower(matrix: &DMatrix<f64>, what: &'static str) -> Result<DMatrix<f64>> {
    check_square(matrix)?;
    if !all_finite(matrix) {
        return Err(FilterError::NonFinite(what));
    }
    // a zero pivot factors without complaint but is not positive definite
    Cholesky::new(symmetrize(matrix))
        .map(|ch| ch.l())
        .filter(|l| l.diagonal().iter().all(|d| d.is_finite() && *d > 0.0))
        .ok_or(FilterError::NotPositiveDefinite(what))
}

/// Inverse of a symmetric positive definite matrix through its Cholesky factorization.
///
/// Indefinite or semi-definite input fails with [FilterError::NotPositiveDefinite]; it is
/// never inverted some other way. Fails with [FilterError::SingularMatrix] when the
/// factor exists but the inverse overflows.
pub fn spd_inverse(matrix: &DMatrix<f64>, what: &'static str) -> Result<DMatrix<f64>> {
    check_square(matrix)?;
    if !all_finite(matrix) {
        return Err(FilterError::NonFinite(what));
    }
    let ch = Cholesky::new(symmetrize(matrix))
        .filter(|ch| ch.l_dirty().diagonal().iter().all(|d| d.is_finite() && *d > 0.0))
        .ok_or(FilterError::NotPositiveDefinite(what))?;
    Some(ch.inverse())
        .filter(all_finite)
        .ok_or(FilterError::SingularMatrix(what))
}

/// Smallest eigenvalue of the symmetrized matrix.
///
/// Used to check that a covariance is still (numerically) positive semi-definite.
pub fn min_eigenvalue(matrix: &DMatrix<f64>) -> f64 {
    SymmetricEigen::new(symmetrize(matrix))
        .eigenvalues
        .iter()
        .cloned()
        .fold(f64::INFINITY, f64::min)
}

fn all_finite(m: &DMatrix<f64>) -> bool {
    m.iter().all(|v| v.is_finite())
}

fn check_square(matrix: &DMatrix<f64>) -> Result<()> {
    if matrix.is_square() {
        Ok(())
    } else {
        Err(FilterError::DimensionMismatch {
            expected: matrix.nrows(),
            found: matrix.ncols(),
        })
    }
}

/* =============================== Tests ==================================== */

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: &DMatrix<f64>, b: &DMatrix<f64>, tol: f64) -> bool {
        if a.shape() != b.shape() {
            return false;
        }
        let mut max_abs = 0.0f64;
        for i in 0..a.nrows() {
            for j in 0..a.ncols() {
                max_abs = max_abs.max((a[(i, j)] - b[(i, j)]).abs());
            }
        }
        max_abs <= tol
    }

    #[test]
    fn t_symmetrize() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 0.0, 3.0]);
        let s = symmetrize(&m);
        let s_expected = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 3.0]);
        assert!(approx_eq(&s, &s_expected, 1e-15));
    }

    #[test]
    fn t_cholesky_lower_spd() {
        // P = A Aᵀ is SPD
        let a = DMatrix::from_row_slice(3, 3, &[1.0, 2.0, 0.5, 0.0, 1.0, -1.0, 0.0, 0.0, 0.2]);
        let p = &a * a.transpose();
        let l = cholesky_lower(&p, "test").expect("Cholesky should succeed for SPD");
        let back = &l * l.transpose();
        assert!(approx_eq(&back, &p, 1e-12));
        // lower triangular
        for i in 0..3 {
            for j in (i + 1)..3 {
                assert_eq!(l[(i, j)], 0.0);
            }
        }
    }

    #[test]
    fn t_cholesky_lower_identity() {
        let i = DMatrix::<f64>::identity(4, 4);
        let l = cholesky_lower(&i, "identity").unwrap();
        assert!(approx_eq(&l, &i, 1e-14));
    }

    #[test]
    fn t_cholesky_lower_not_pd() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]); // eigenvalues: 3, -1
        let result = cholesky_lower(&m, "indefinite");
        assert_eq!(result, Err(FilterError::NotPositiveDefinite("indefinite")));
    }

    #[test]
    fn t_cholesky_lower_zero_variance() {
        let mut m = DMatrix::<f64>::identity(3, 3);
        m[(1, 1)] = 0.0;
        assert!(cholesky_lower(&m, "psd").is_err());
    }

    #[test]
    fn t_cholesky_lower_nan() {
        let mut m = DMatrix::<f64>::identity(2, 2);
        m[(0, 1)] = f64::NAN;
        assert_eq!(cholesky_lower(&m, "nan"), Err(FilterError::NonFinite("nan")));
    }

    #[test]
    fn t_non_square() {
        let m = DMatrix::<f64>::zeros(3, 2);
        assert!(matches!(
            cholesky_lower(&m, "rect"),
            Err(FilterError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            spd_inverse(&m, "rect"),
            Err(FilterError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn t_spd_inverse() {
        let p = DMatrix::from_row_slice(3, 3, &[4.0, 2.0, 0.0, 2.0, 9.0, 3.0, 0.0, 3.0, 16.0]);
        let inv = spd_inverse(&p, "p").unwrap();
        let id = &p * &inv;
        assert!(approx_eq(&id, &DMatrix::identity(3, 3), 1e-12));
    }

    #[test]
    fn t_spd_inverse_rejects_indefinite() {
        // invertible, but an innovation covariance like this means the filter diverged
        let m = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 1.0, 0.0]);
        assert!(m.clone().try_inverse().is_some());
        assert_eq!(
            spd_inverse(&m, "innovation covariance"),
            Err(FilterError::NotPositiveDefinite("innovation covariance"))
        );
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert_eq!(
            spd_inverse(&m, "indefinite"),
            Err(FilterError::NotPositiveDefinite("indefinite"))
        );
    }

    #[test]
    fn t_spd_inverse_semi_definite() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        assert!(spd_inverse(&m, "innovation covariance").is_err());
    }

    #[test]
    fn t_min_eigenvalue() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!((min_eigenvalue(&m) + 1.0).abs() < 1e-12);
        let d = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![3.0, 0.5, 2.0]));
        assert!((min_eigenvalue(&d) - 0.5).abs() < 1e-12);
    }
}
