//! Evaluator contract of the large-scale solver.
//!
//! The solver never sees the Jacobian J itself. A problem only has to provide
//! the residual f(x), the products J(x)^T y for an arbitrary n-vector y and,
//! when asked, the p x p matrix J(x)^T J(x). Typically both are accumulated
//! block by block over the data (see
//! [`NormalEquationsAccumulator`](crate::somelinalg::normal_equations::NormalEquationsAccumulator)).
use crate::numerical::multilarge_errors::{MultilargeError, Result, check_len};
use log::debug;
use nalgebra::{DMatrix, DVector};

/// A nonlinear least squares problem described by its normal equations
pub trait NormalEquationsProblem {
    /// number of residuals n
    fn num_residuals(&self) -> usize;

    /// number of parameters p
    fn num_parameters(&self) -> usize;

    /// f <- f(x)
    fn residual(&mut self, x: &DVector<f64>, f: &mut DVector<f64>) -> Result<()>;

    /// jty <- J(x)^T y and, if `jtj` is given, jtj <- J(x)^T J(x)
    fn normal_equations(
        &mut self,
        x: &DVector<f64>,
        y: &DVector<f64>,
        jty: &mut DVector<f64>,
        jtj: Option<&mut DMatrix<f64>>,
    ) -> Result<()>;

    /// whether [`fvv`](Self::fvv) is implemented; if not, the geodesic
    /// acceleration falls back to finite differences
    fn has_fvv(&self) -> bool {
        false
    }

    /// fvv <- second directional derivative of f at x along v
    fn fvv(&mut self, _x: &DVector<f64>, _v: &DVector<f64>, _fvv: &mut DVector<f64>) -> Result<()> {
        Err(MultilargeError::InvalidConfig(
            "second directional derivative is not provided by this problem".to_string(),
        ))
    }
}

type ResidualFn<'a> = Box<dyn FnMut(&DVector<f64>, &mut DVector<f64>) -> Result<()> + 'a>;
type NormalEquationsFn<'a> = Box<
    dyn FnMut(&DVector<f64>, &DVector<f64>, &mut DVector<f64>, Option<&mut DMatrix<f64>>) -> Result<()>
        + 'a,
>;
type FvvFn<'a> = Box<dyn FnMut(&DVector<f64>, &DVector<f64>, &mut DVector<f64>) -> Result<()> + 'a>;

/// Problem assembled from closures
pub struct ClosureProblem<'a> {
    n: usize,
    p: usize,
    residual_fn: ResidualFn<'a>,
    normal_fn: NormalEquationsFn<'a>,
    fvv_fn: Option<FvvFn<'a>>,
}

impl<'a> ClosureProblem<'a> {
    pub fn new<F, DF>(n: usize, p: usize, residual_fn: F, normal_fn: DF) -> Self
    where
        F: FnMut(&DVector<f64>, &mut DVector<f64>) -> Result<()> + 'a,
        DF: FnMut(&DVector<f64>, &DVector<f64>, &mut DVector<f64>, Option<&mut DMatrix<f64>>) -> Result<()>
            + 'a,
    {
        Self {
            n,
            p,
            residual_fn: Box::new(residual_fn),
            normal_fn: Box::new(normal_fn),
            fvv_fn: None,
        }
    }

    /// attach an analytic second directional derivative
    pub fn with_fvv<FV>(mut self, fvv_fn: FV) -> Self
    where
        FV: FnMut(&DVector<f64>, &DVector<f64>, &mut DVector<f64>) -> Result<()> + 'a,
    {
        self.fvv_fn = Some(Box::new(fvv_fn));
        self
    }
}

impl<'a> NormalEquationsProblem for ClosureProblem<'a> {
    fn num_residuals(&self) -> usize {
        self.n
    }

    fn num_parameters(&self) -> usize {
        self.p
    }

    fn residual(&mut self, x: &DVector<f64>, f: &mut DVector<f64>) -> Result<()> {
        (self.residual_fn)(x, f)
    }

    fn normal_equations(
        &mut self,
        x: &DVector<f64>,
        y: &DVector<f64>,
        jty: &mut DVector<f64>,
        jtj: Option<&mut DMatrix<f64>>,
    ) -> Result<()> {
        (self.normal_fn)(x, y, jty, jtj)
    }

    fn has_fvv(&self) -> bool {
        self.fvv_fn.is_some()
    }

    fn fvv(&mut self, x: &DVector<f64>, v: &DVector<f64>, fvv: &mut DVector<f64>) -> Result<()> {
        match self.fvv_fn.as_mut() {
            Some(fvv_fn) => fvv_fn(x, v, fvv),
            None => Err(MultilargeError::InvalidConfig(
                "second directional derivative is not provided by this problem".to_string(),
            )),
        }
    }
}

/// A problem together with its evaluation counters.
///
/// Counters only grow while the problem is owned by a solver session.
#[derive(Debug, Clone)]
pub struct Fdf<P: NormalEquationsProblem> {
    pub problem: P,
    /// evaluations of f
    pub nevalf: usize,
    /// evaluations of J^T J (together with J^T y)
    pub nevaldf: usize,
    /// evaluations of J^T y alone
    pub nevaldfu: usize,
    /// evaluations of the analytic fvv
    pub nevalfvv: usize,
}

impl<P: NormalEquationsProblem> Fdf<P> {
    pub fn new(problem: P) -> Self {
        Self {
            problem,
            nevalf: 0,
            nevaldf: 0,
            nevaldfu: 0,
            nevalfvv: 0,
        }
    }

    pub fn n(&self) -> usize {
        self.problem.num_residuals()
    }

    pub fn p(&self) -> usize {
        self.problem.num_parameters()
    }

    pub fn into_problem(self) -> P {
        self.problem
    }

    /// f <- f(x)
    pub fn eval_f(&mut self, x: &DVector<f64>, f: &mut DVector<f64>) -> Result<()> {
        self.nevalf += 1;
        self.problem.residual(x, f)
    }

    /// jty <- J(x)^T y, jtj <- J(x)^T J(x)
    pub fn eval_df(
        &mut self,
        x: &DVector<f64>,
        y: &DVector<f64>,
        jty: &mut DVector<f64>,
        jtj: &mut DMatrix<f64>,
    ) -> Result<()> {
        self.nevaldf += 1;
        self.problem.normal_equations(x, y, jty, Some(jtj))
    }

    /// jty <- J(x)^T y without touching J^T J
    pub fn eval_jty(&mut self, x: &DVector<f64>, y: &DVector<f64>, jty: &mut DVector<f64>) -> Result<()> {
        self.nevaldfu += 1;
        self.problem.normal_equations(x, y, jty, None)
    }

    /// Second directional derivative along the velocity v and its projection J^T fvv.
    ///
    /// With an analytic fvv, `fvv` receives it and `jtfvv` = J^T fvv.
    /// Otherwise J^T fvv is estimated with a forward difference of step `h`
    /// and `fvv` is used as n-length scratch (it then holds f(x + h v)).
    #[allow(clippy::too_many_arguments)]
    pub fn eval_fvv(
        &mut self,
        h: f64,
        x: &DVector<f64>,
        v: &DVector<f64>,
        g: &DVector<f64>,
        jtj: &DMatrix<f64>,
        fvv: &mut DVector<f64>,
        jtfvv: &mut DVector<f64>,
        workp: &mut DVector<f64>,
    ) -> Result<()> {
        if self.problem.has_fvv() {
            self.nevalfvv += 1;
            self.problem.fvv(x, v, fvv)?;
            check_len("fvv", self.n(), fvv.len())?;
            self.eval_jty(x, fvv, jtfvv)
        } else {
            self.fd_jtfvv(h, x, v, g, jtj, jtfvv, fvv, workp)
        }
    }

    /// Finite difference estimate of J^T fvv using only the normal equations:
    ///
    ///   fvv ~ 2/h * [ (f(x + h v) - f(x)) / h - J v ]
    ///   J^T fvv ~ 2/h * [ (J^T f(x + h v) - g) / h - J^T J v ]
    #[allow(clippy::too_many_arguments)]
    fn fd_jtfvv(
        &mut self,
        h: f64,
        x: &DVector<f64>,
        v: &DVector<f64>,
        g: &DVector<f64>,
        jtj: &DMatrix<f64>,
        jtfvv: &mut DVector<f64>,
        workn: &mut DVector<f64>,
        workp: &mut DVector<f64>,
    ) -> Result<()> {
        let p = x.len();
        for i in 0..p {
            workp[i] = x[i] + h * v[i];
        }
        self.eval_f(workp, workn)?;
        self.eval_jty(x, workn, jtfvv)?;

        workp.gemv(1.0, jtj, v, 0.0);
        let two_over_h = 2.0 / h;
        for i in 0..p {
            jtfvv[i] = two_over_h * ((jtfvv[i] - g[i]) / h - workp[i]);
        }
        debug!("finite difference J^T fvv with h = {}: ||J^T fvv|| = {}", h, jtfvv.norm());
        Ok(())
    }
}
