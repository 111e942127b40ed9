use log::warn;
use nalgebra::DMatrix;

/// Reciprocal condition number estimate of a symmetric positive semidefinite
/// matrix A = J^T J from its eigenvalues: rcond(J) = sqrt(lambda_min / lambda_max).
///
/// If the computed eigenvalues are not both strictly positive (rounding errors
/// when forming J^T J, or a genuinely singular J) the estimate is unreliable and
/// 0.0 is returned.
pub fn symmetric_rcond(a: &DMatrix<f64>) -> f64 {
    if a.nrows() == 0 || a.nrows() != a.ncols() {
        return 0.0;
    }
    let eval = a.symmetric_eigenvalues();
    let eval_min = eval.min();
    let eval_max = eval.max();

    if eval_max > 0.0 && eval_min > 0.0 {
        (eval_min / eval_max).sqrt()
    } else {
        warn!(
            "eigenvalues of J^T J are not positive (min = {}, max = {}), rcond set to 0",
            eval_min, eval_max
        );
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn diagonal_matrix() {
        let a = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![4.0, 1.0, 2.0]));
        assert_relative_eq!(symmetric_rcond(&a), 0.5, epsilon = 1e-14);
    }

    #[test]
    fn singular_matrix_gives_zero() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let r = symmetric_rcond(&a);
        assert!(r >= 0.0 && r < 1e-6);
        let z = DMatrix::<f64>::zeros(3, 3);
        assert_eq!(symmetric_rcond(&z), 0.0);
    }

    #[test]
    fn identity_is_perfectly_conditioned() {
        let a = DMatrix::<f64>::identity(4, 4);
        assert_relative_eq!(symmetric_rcond(&a), 1.0, epsilon = 1e-14);
    }
}
