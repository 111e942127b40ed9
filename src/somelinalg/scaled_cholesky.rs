//! Cholesky factorization of the damped normal matrix A = J^T J + mu * diag(D^T D).
//!
//! A is symmetrically scaled by S = diag(1/sqrt(A_jj)) before factoring, which
//! keeps the factorization well behaved when the columns of J have very
//! different magnitudes. The p x p storage is allocated once and handed back
//! and forth between the nalgebra factor and this struct, so repeated
//! decompositions with a new mu do not allocate.
use log::debug;
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

#[derive(Debug, Clone)]
pub struct ScaledCholesky {
    p: usize,
    factor: Option<Cholesky<f64, Dyn>>,
    spare: Option<DMatrix<f64>>,
    // Cholesky scale factors 1/sqrt(A_jj)
    scale: DVector<f64>,
}

impl ScaledCholesky {
    pub fn new(p: usize) -> Self {
        Self {
            p,
            factor: None,
            spare: Some(DMatrix::zeros(p, p)),
            scale: DVector::zeros(p),
        }
    }

    fn take_storage(&mut self) -> DMatrix<f64> {
        match (self.factor.take(), self.spare.take()) {
            (Some(chol), _) => chol.unpack_dirty(),
            (None, Some(m)) => m,
            // the previous attempt was not positive definite and nalgebra kept the matrix
            (None, None) => DMatrix::zeros(self.p, self.p),
        }
    }

    /// Form and factor J^T J + mu * diag(dtd). Returns false when the damped
    /// matrix is not numerically positive definite; the caller is expected to
    /// increase mu and retry.
    pub fn decompose_damped(&mut self, jtj: &DMatrix<f64>, mu: f64, dtd: &DVector<f64>) -> bool {
        let p = self.p;
        let mut a = self.take_storage();
        a.copy_from(jtj);
        for j in 0..p {
            a[(j, j)] += mu * dtd[j];
        }

        for j in 0..p {
            let ajj = a[(j, j)];
            if !(ajj > 0.0) || !ajj.is_finite() {
                debug!("damped matrix has non-positive diagonal A[{},{}] = {}", j, j, ajj);
                self.spare = Some(a);
                return false;
            }
            self.scale[j] = 1.0 / ajj.sqrt();
        }

        for j in 0..p {
            let sj = self.scale[j];
            for i in 0..p {
                a[(i, j)] *= self.scale[i] * sj;
            }
        }

        match Cholesky::new(a) {
            Some(chol) => {
                self.factor = Some(chol);
                true
            }
            None => {
                debug!("Cholesky factorization failed for mu = {}", mu);
                false
            }
        }
    }

    /// out = -A^{-1} rhs using the current factorization.
    /// Returns false if no valid factorization is available.
    pub fn solve_negated(&self, rhs: &DVector<f64>, out: &mut DVector<f64>) -> bool {
        let Some(chol) = self.factor.as_ref() else {
            return false;
        };
        // A x = b  <=>  (S A S) (S^-1 x) = S b
        out.copy_from(rhs);
        out.component_mul_assign(&self.scale);
        chol.solve_mut(out);
        out.component_mul_assign(&self.scale);
        out.neg_mut();
        true
    }

    /// out = A^{-1} rhs using the current factorization
    pub fn solve(&self, rhs: &DVector<f64>, out: &mut DVector<f64>) -> bool {
        if !self.solve_negated(rhs, out) {
            return false;
        }
        out.neg_mut();
        true
    }

    pub fn is_factored(&self) -> bool {
        self.factor.is_some()
    }

    pub fn scale_factors(&self) -> &DVector<f64> {
        &self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn solves_damped_system() {
        let jtj = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.5, 1.0, 9.0, 2.0, 0.5, 2.0, 100.0]);
        let dtd = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let g = DVector::from_vec(vec![1.0, -1.0, 2.0]);
        let mu = 0.25;

        let mut chol = ScaledCholesky::new(3);
        assert!(chol.decompose_damped(&jtj, mu, &dtd));
        let mut v = DVector::zeros(3);
        assert!(chol.solve_negated(&g, &mut v));

        let mut a = jtj.clone();
        for j in 0..3 {
            a[(j, j)] += mu * dtd[j];
        }
        assert_relative_eq!(&a * &v, -&g, epsilon = 1e-12);
    }

    #[test]
    fn indefinite_matrix_is_reported_and_storage_recovers() {
        let jtj = DMatrix::from_row_slice(2, 2, &[1.0, 3.0, 3.0, 1.0]);
        let dtd = DVector::from_element(2, 1.0);
        let mut chol = ScaledCholesky::new(2);
        assert!(!chol.decompose_damped(&jtj, 0.0, &dtd));
        assert!(!chol.is_factored());
        // enough damping makes it positive definite again
        assert!(chol.decompose_damped(&jtj, 10.0, &dtd));
        let mut x = DVector::zeros(2);
        assert!(chol.solve(&DVector::from_vec(vec![14.0, 14.0]), &mut x));
        assert_relative_eq!(x, DVector::from_vec(vec![1.0, 1.0]), epsilon = 1e-12);
    }

    #[test]
    fn negative_diagonal_fails_early() {
        let jtj = DMatrix::from_element(1, 1, -0.5);
        let dtd = DVector::from_element(1, 1.0);
        let mut chol = ScaledCholesky::new(1);
        assert!(!chol.decompose_damped(&jtj, 1e-3, &dtd));
        assert!(chol.decompose_damped(&jtj, 1.0, &dtd));
        assert_relative_eq!(chol.scale_factors()[0], 1.0 / 0.5f64.sqrt(), epsilon = 1e-15);
    }
}
