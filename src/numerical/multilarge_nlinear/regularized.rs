//! Tikhonov regularization of a nonlinear problem: minimize
//!
//!   ||f(x)||^2 + lambda^2 ||L x||^2,   L = diag(l)
//!
//! by appending p residual rows lambda * l_i * x_i. The extra rows only
//! touch the diagonal of J^T J, so the wrapped problem still never forms J.
use super::fdf::NormalEquationsProblem;
use crate::numerical::multilarge_errors::{MultilargeError, Result, check_len};
use nalgebra::{DMatrix, DVector};

pub struct TikhonovProblem<P: NormalEquationsProblem> {
    inner: P,
    lambda: f64,
    l: DVector<f64>,
    // n-length scratch for the unregularized rows
    top: DVector<f64>,
}

impl<P: NormalEquationsProblem> TikhonovProblem<P> {
    pub fn new(inner: P, lambda: f64, l: DVector<f64>) -> Result<Self> {
        check_len("regularization diagonal L", inner.num_parameters(), l.len())?;
        if !(lambda >= 0.0) || !lambda.is_finite() {
            return Err(MultilargeError::InvalidConfig(format!(
                "lambda must be a non-negative number, got {}",
                lambda
            )));
        }
        if l.iter().any(|li| *li == 0.0 || !li.is_finite()) {
            return Err(MultilargeError::InvalidConfig(
                "entries of L must be finite and nonzero".to_string(),
            ));
        }
        let n = inner.num_residuals();
        Ok(Self {
            inner,
            lambda,
            l,
            top: DVector::zeros(n),
        })
    }

    /// L = I
    pub fn identity(inner: P, lambda: f64) -> Result<Self> {
        let p = inner.num_parameters();
        Self::new(inner, lambda, DVector::from_element(p, 1.0))
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P: NormalEquationsProblem> NormalEquationsProblem for TikhonovProblem<P> {
    fn num_residuals(&self) -> usize {
        self.inner.num_residuals() + self.inner.num_parameters()
    }

    fn num_parameters(&self) -> usize {
        self.inner.num_parameters()
    }

    fn residual(&mut self, x: &DVector<f64>, f: &mut DVector<f64>) -> Result<()> {
        let n = self.top.len();
        self.inner.residual(x, &mut self.top)?;
        f.rows_mut(0, n).copy_from(&self.top);
        for i in 0..x.len() {
            f[n + i] = self.lambda * self.l[i] * x[i];
        }
        Ok(())
    }

    fn normal_equations(
        &mut self,
        x: &DVector<f64>,
        y: &DVector<f64>,
        jty: &mut DVector<f64>,
        jtj: Option<&mut DMatrix<f64>>,
    ) -> Result<()> {
        let n = self.top.len();
        self.top.copy_from(&y.rows(0, n));
        match jtj {
            Some(jtj) => {
                self.inner.normal_equations(x, &self.top, jty, Some(&mut *jtj))?;
                for i in 0..self.l.len() {
                    let li = self.lambda * self.l[i];
                    jtj[(i, i)] += li * li;
                }
            }
            None => self.inner.normal_equations(x, &self.top, jty, None)?,
        }
        for i in 0..self.l.len() {
            jty[i] += self.lambda * self.l[i] * y[n + i];
        }
        Ok(())
    }

    fn has_fvv(&self) -> bool {
        self.inner.has_fvv()
    }

    // the regularization rows are linear in x
    fn fvv(&mut self, x: &DVector<f64>, v: &DVector<f64>, fvv: &mut DVector<f64>) -> Result<()> {
        let n = self.top.len();
        self.inner.fvv(x, v, &mut self.top)?;
        fvv.rows_mut(0, n).copy_from(&self.top);
        fvv.rows_mut(n, self.l.len()).fill(0.0);
        Ok(())
    }
}
