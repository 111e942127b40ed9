//! Tall skinny QR: only the p x p triangular factor R of the rows seen so far
//! is kept, together with the first p entries of Q^T y and the squared norm of
//! the remaining ones. Each new block is folded in with a QR of [R; X_block].
//! Works on X directly, so the condition number is not squared.
use super::LinearSolution;
use crate::numerical::multilarge_errors::{MultilargeError, Result, check_len};
use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct TsqrSolver {
    p: usize,
    r: DMatrix<f64>,
    qty: DVector<f64>,
    // ||(Q^T y)[p..]||^2, the part of ||y - X c||^2 no c can remove
    rnorm_sq: f64,
    nrows: usize,
}

/// R factor, its share of Q^T y and the left-over squared residual of one block
type BlockFactor = (DMatrix<f64>, DVector<f64>, f64);

/// QR of a single block [X | y]
fn factor_block(x: &DMatrix<f64>, y: &DVector<f64>) -> BlockFactor {
    let m = x.nrows();
    let k = m.min(x.ncols());
    let qr = x.clone().qr();
    let mut b = y.clone();
    qr.q_tr_mul(&mut b);
    (
        qr.r(),
        b.rows(0, k).into_owned(),
        b.rows(k, m - k).norm_squared(),
    )
}

impl TsqrSolver {
    pub fn new(p: usize) -> Self {
        Self {
            p,
            r: DMatrix::zeros(p, p),
            qty: DVector::zeros(p),
            rnorm_sq: 0.0,
            nrows: 0,
        }
    }

    /// R, Q^T y <- QR of [R; x], [Q^T y; y]
    fn fold(&mut self, x: &DMatrix<f64>, y: &DVector<f64>) {
        let p = self.p;
        let m = x.nrows();
        let mut stacked = DMatrix::zeros(p + m, p);
        stacked.view_mut((0, 0), (p, p)).copy_from(&self.r);
        stacked.view_mut((p, 0), (m, p)).copy_from(x);
        let mut b = DVector::zeros(p + m);
        b.rows_mut(0, p).copy_from(&self.qty);
        b.rows_mut(p, m).copy_from(y);

        let qr = stacked.qr();
        qr.q_tr_mul(&mut b);
        self.r = qr.r();
        self.qty.copy_from(&b.rows(0, p));
        self.rnorm_sq += b.rows(p, m).norm_squared();
    }

    pub fn accumulate(&mut self, x: &DMatrix<f64>, y: &DVector<f64>) -> Result<()> {
        check_len("block columns", self.p, x.ncols())?;
        check_len("block right hand side", x.nrows(), y.len())?;
        self.fold(x, y);
        self.nrows += x.nrows();
        Ok(())
    }

    /// Every block is reduced to its own R factor in parallel; the factors
    /// are then folded in block order.
    pub fn accumulate_par(&mut self, blocks: &[(DMatrix<f64>, DVector<f64>)]) -> Result<()> {
        for (x, y) in blocks {
            check_len("block columns", self.p, x.ncols())?;
            check_len("block right hand side", x.nrows(), y.len())?;
        }
        let factors: Vec<BlockFactor> = blocks
            .par_iter()
            .map(|(x, y)| factor_block(x, y))
            .collect();
        debug!("folding {} block factors", factors.len());
        for ((r, qty, rnorm_sq), (x, _)) in factors.iter().zip(blocks) {
            self.fold(r, qty);
            self.rnorm_sq += rnorm_sq;
            self.nrows += x.nrows();
        }
        Ok(())
    }

    pub fn solve(&mut self, lambda: f64) -> Result<LinearSolution> {
        let p = self.p;
        let c = if lambda == 0.0 {
            self.r.solve_upper_triangular(&self.qty)
        } else {
            // min || [R; lambda I] c - [Q^T y; 0] ||
            let mut stacked = DMatrix::zeros(2 * p, p);
            stacked.view_mut((0, 0), (p, p)).copy_from(&self.r);
            stacked
                .view_mut((p, 0), (p, p))
                .fill_diagonal(lambda);
            let mut b = DVector::zeros(2 * p);
            b.rows_mut(0, p).copy_from(&self.qty);
            let qr = stacked.qr();
            qr.q_tr_mul(&mut b);
            qr.r().solve_upper_triangular(&b.rows(0, p))
        };
        let c = c.ok_or_else(|| {
            MultilargeError::SingularSystem(format!(
                "triangular factor is singular (lambda = {})",
                lambda
            ))
        })?;

        let fit = &self.qty - &self.r * &c;
        let rnorm = (fit.norm_squared() + self.rnorm_sq).sqrt();
        let snorm = c.norm();
        info!(
            "TSQR solve: lambda = {}, ||y - X c|| = {}, ||c|| = {}",
            lambda, rnorm, snorm
        );
        Ok(LinearSolution { c, rnorm, snorm })
    }

    /// sigma_min / sigma_max of R, which are the singular values of X
    pub fn rcond(&self) -> f64 {
        let s = self.r.singular_values();
        let (smin, smax) = (s.min(), s.max());
        if smax > 0.0 && smin > 0.0 { smin / smax } else { 0.0 }
    }

    pub fn reset(&mut self) {
        self.r.fill(0.0);
        self.qty.fill(0.0);
        self.rnorm_sq = 0.0;
        self.nrows = 0;
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn r(&self) -> &DMatrix<f64> {
        &self.r
    }
}
