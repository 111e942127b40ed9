//! Block-wise accumulation of the normal equations A^T A, A^T y.
//!
//! The full design matrix is never stored: every block of rows is folded into
//! the p x p matrix A^T A and the p-vector A^T y and can be dropped afterwards.
//! Used by the linear "normal" solver and by nonlinear evaluators that build
//! J^T J from Jacobian blocks.
use crate::numerical::multilarge_errors::{MultilargeError, Result, check_len};
use log::debug;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct NormalEquationsAccumulator {
    p: usize,
    ata: DMatrix<f64>,
    aty: DVector<f64>,
    yty: f64,
    nrows: usize,
}

impl NormalEquationsAccumulator {
    pub fn new(p: usize) -> Self {
        Self {
            p,
            ata: DMatrix::zeros(p, p),
            aty: DVector::zeros(p),
            yty: 0.0,
            nrows: 0,
        }
    }

    /// forget everything accumulated so far (buffers are kept)
    pub fn reset(&mut self) {
        self.ata.fill(0.0);
        self.aty.fill(0.0);
        self.yty = 0.0;
        self.nrows = 0;
    }

    /// A^T A += a^T a, A^T y += a^T y
    pub fn accumulate(&mut self, a: &DMatrix<f64>, y: &DVector<f64>) -> Result<()> {
        check_len("block columns", self.p, a.ncols())?;
        check_len("block right hand side", a.nrows(), y.len())?;
        self.ata.gemm_tr(1.0, a, a, 1.0);
        self.aty.gemv_tr(1.0, a, y, 1.0);
        self.yty += y.norm_squared();
        self.nrows += a.nrows();
        Ok(())
    }

    /// Same as [`accumulate`](Self::accumulate) but only A^T y is updated;
    /// A^T A is left untouched. Rows are still counted.
    pub fn accumulate_rhs(&mut self, a: &DMatrix<f64>, y: &DVector<f64>) -> Result<()> {
        check_len("block columns", self.p, a.ncols())?;
        check_len("block right hand side", a.nrows(), y.len())?;
        self.aty.gemv_tr(1.0, a, y, 1.0);
        self.yty += y.norm_squared();
        self.nrows += a.nrows();
        Ok(())
    }

    /// Accumulate many blocks at once. Each block's contribution is computed in
    /// parallel, then the partial sums are added in block order, so the result
    /// is reproducible for a fixed partition (it differs from the serial
    /// `accumulate` loop only by floating point summation order).
    pub fn accumulate_par(&mut self, blocks: &[(DMatrix<f64>, DVector<f64>)]) -> Result<()> {
        for (a, y) in blocks {
            check_len("block columns", self.p, a.ncols())?;
            check_len("block right hand side", a.nrows(), y.len())?;
        }
        let partials: Vec<(DMatrix<f64>, DVector<f64>, f64, usize)> = blocks
            .par_iter()
            .map(|(a, y)| (a.tr_mul(a), a.tr_mul(y), y.norm_squared(), a.nrows()))
            .collect();
        debug!("accumulating {} blocks computed in parallel", partials.len());
        for (ata, aty, yty, rows) in partials {
            self.ata += ata;
            self.aty += aty;
            self.yty += yty;
            self.nrows += rows;
        }
        Ok(())
    }

    pub fn ata(&self) -> &DMatrix<f64> {
        &self.ata
    }

    pub fn aty(&self) -> &DVector<f64> {
        &self.aty
    }

    /// y^T y of all accumulated right hand sides
    pub fn yty(&self) -> f64 {
        self.yty
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn p(&self) -> usize {
        self.p
    }

    /// ||y - A c|| computed from the accumulated quantities:
    /// y^T y - 2 c^T A^T y + c^T A^T A c (clamped at zero against round-off)
    pub fn residual_norm(&self, c: &DVector<f64>) -> Result<f64> {
        check_len("solution", self.p, c.len())?;
        let ata_c = &self.ata * c;
        let r2 = self.yty - 2.0 * c.dot(&self.aty) + c.dot(&ata_c);
        if !r2.is_finite() {
            return Err(MultilargeError::SingularSystem(
                "residual norm is not finite".to_string(),
            ));
        }
        Ok(r2.max(0.0).sqrt())
    }
}
