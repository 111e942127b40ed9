//! Large linear least squares with Tikhonov regularization
//!
//!   min ||y - X c||^2 + lambda^2 ||c||^2
//!
//! where X is too large to hold at once and is fed in blocks of rows.
//! Two accumulation methods are available: the normal equations (cheap,
//! squares the condition number) and TSQR (a running QR factorization).
//! General form problems with weights and a diagonal L go through
//! [`stdform::wstdform1`] / [`stdform::genform1`].
use crate::numerical::multilarge_errors::{MultilargeError, Result};
use log::info;
use nalgebra::{DMatrix, DVector};
use strum_macros::{Display, EnumString};

pub mod normal;
pub mod stdform;
pub mod tsqr;

use normal::NormalSolver;
use tsqr::TsqrSolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MultilargeLinearMethod {
    Normal,
    Tsqr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearSolution {
    pub c: DVector<f64>,
    /// ||y - X c||
    pub rnorm: f64,
    /// ||c||
    pub snorm: f64,
}

#[derive(Debug, Clone)]
enum LinearState {
    Normal(NormalSolver),
    Tsqr(TsqrSolver),
}

#[derive(Debug, Clone)]
pub struct MultilargeLinearWorkspace {
    method: MultilargeLinearMethod,
    p: usize,
    state: LinearState,
}

impl MultilargeLinearWorkspace {
    pub fn alloc(method: MultilargeLinearMethod, p: usize) -> Result<Self> {
        if p == 0 {
            return Err(MultilargeError::InvalidConfig(
                "p must be a positive integer".to_string(),
            ));
        }
        let state = match method {
            MultilargeLinearMethod::Normal => LinearState::Normal(NormalSolver::new(p)),
            MultilargeLinearMethod::Tsqr => LinearState::Tsqr(TsqrSolver::new(p)),
        };
        info!("allocated {} linear workspace with p = {}", method, p);
        Ok(Self { method, p, state })
    }

    /// Add a block of rows (any number of rows)
    pub fn accumulate(&mut self, x: &DMatrix<f64>, y: &DVector<f64>) -> Result<()> {
        match &mut self.state {
            LinearState::Normal(s) => s.accumulate(x, y),
            LinearState::Tsqr(s) => s.accumulate(x, y),
        }
    }

    /// Add many blocks; per-block work runs on the rayon pool and the
    /// results are combined in block order.
    pub fn accumulate_par(&mut self, blocks: &[(DMatrix<f64>, DVector<f64>)]) -> Result<()> {
        match &mut self.state {
            LinearState::Normal(s) => s.accumulate_par(blocks),
            LinearState::Tsqr(s) => s.accumulate_par(blocks),
        }
    }

    pub fn solve(&mut self, lambda: f64) -> Result<LinearSolution> {
        if !(lambda >= 0.0) || !lambda.is_finite() {
            return Err(MultilargeError::InvalidConfig(format!(
                "lambda must be a non-negative number, got {}",
                lambda
            )));
        }
        if self.nrows() == 0 {
            return Err(MultilargeError::InvalidState(
                "no rows accumulated".to_string(),
            ));
        }
        match &mut self.state {
            LinearState::Normal(s) => s.solve(lambda),
            LinearState::Tsqr(s) => s.solve(lambda),
        }
    }

    /// Reciprocal condition number of X estimated from what was accumulated
    pub fn rcond(&self) -> Result<f64> {
        if self.nrows() == 0 {
            return Err(MultilargeError::InvalidState(
                "no rows accumulated".to_string(),
            ));
        }
        Ok(match &self.state {
            LinearState::Normal(s) => s.rcond(),
            LinearState::Tsqr(s) => s.rcond(),
        })
    }

    pub fn reset(&mut self) {
        match &mut self.state {
            LinearState::Normal(s) => s.reset(),
            LinearState::Tsqr(s) => s.reset(),
        }
    }

    pub fn nrows(&self) -> usize {
        match &self.state {
            LinearState::Normal(s) => s.nrows(),
            LinearState::Tsqr(s) => s.nrows(),
        }
    }

    pub fn method(&self) -> MultilargeLinearMethod {
        self.method
    }

    pub fn p(&self) -> usize {
        self.p
    }
}
