//! Normal equations method: accumulate X^T X and X^T y block by block, then
//! solve (X^T X + lambda^2 I) c = X^T y with a scaled Cholesky factorization.
//! Fast and cheap in memory, but squares the condition number of X.
use super::LinearSolution;
use crate::numerical::multilarge_errors::{MultilargeError, Result};
use crate::somelinalg::eigen_rcond::symmetric_rcond;
use crate::somelinalg::normal_equations::NormalEquationsAccumulator;
use crate::somelinalg::scaled_cholesky::ScaledCholesky;
use log::info;
use nalgebra::{DMatrix, DVector};

#[derive(Debug, Clone)]
pub struct NormalSolver {
    acc: NormalEquationsAccumulator,
    chol: ScaledCholesky,
    ones: DVector<f64>,
}

impl NormalSolver {
    pub fn new(p: usize) -> Self {
        Self {
            acc: NormalEquationsAccumulator::new(p),
            chol: ScaledCholesky::new(p),
            ones: DVector::from_element(p, 1.0),
        }
    }

    pub fn accumulate(&mut self, x: &DMatrix<f64>, y: &DVector<f64>) -> Result<()> {
        self.acc.accumulate(x, y)
    }

    pub fn accumulate_par(&mut self, blocks: &[(DMatrix<f64>, DVector<f64>)]) -> Result<()> {
        self.acc.accumulate_par(blocks)
    }

    pub fn solve(&mut self, lambda: f64) -> Result<LinearSolution> {
        let lambda_sq = lambda * lambda;
        if !self.chol.decompose_damped(self.acc.ata(), lambda_sq, &self.ones) {
            return Err(MultilargeError::SingularSystem(format!(
                "X^T X + lambda^2 I is not positive definite (lambda = {})",
                lambda
            )));
        }
        let mut c = DVector::zeros(self.acc.p());
        if !self.chol.solve(self.acc.aty(), &mut c) {
            return Err(MultilargeError::SingularSystem(
                "no valid factorization of X^T X".to_string(),
            ));
        }

        let rnorm = self.acc.residual_norm(&c)?;
        let snorm = c.norm();
        info!(
            "normal equations solve: lambda = {}, ||y - X c|| = {}, ||c|| = {}",
            lambda, rnorm, snorm
        );
        Ok(LinearSolution { c, rnorm, snorm })
    }

    pub fn rcond(&self) -> f64 {
        symmetric_rcond(self.acc.ata())
    }

    pub fn reset(&mut self) {
        self.acc.reset();
    }

    pub fn nrows(&self) -> usize {
        self.acc.nrows()
    }

    pub fn ata(&self) -> &DMatrix<f64> {
        self.acc.ata()
    }
}
