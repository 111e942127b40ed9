//! Solver workspace: the public iteration state (x, f, g, J^T J, dx) plus the
//! exclusively owned LM state. Allocated once for a given (n, p) and reused by
//! every `iterate` call.
use super::convergence::{ConvergenceInfo, test_convergence};
use super::fdf::{Fdf, NormalEquationsProblem};
use super::lm::LmState;
use super::parameters::MultilargeNlinearParameters;
use super::scaling::ScalingMethod;
use crate::numerical::multilarge_errors::{MultilargeError, Result, check_len};
use log::{error, info};
use nalgebra::{DMatrix, DVector};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStatus {
    Uninitialized,
    Initialized,
    Iterating,
    Converged,
    /// 15 consecutive rejected steps; needs `restart`
    NoProgress,
    /// an evaluator callback failed; needs `restart`
    EvaluatorError,
}

impl fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SolverStatus::Uninitialized => write!(f, "uninitialized"),
            SolverStatus::Initialized => write!(f, "initialized"),
            SolverStatus::Iterating => write!(f, "iterating"),
            SolverStatus::Converged => write!(f, "converged"),
            SolverStatus::NoProgress => write!(f, "no progress"),
            SolverStatus::EvaluatorError => write!(f, "evaluator error"),
        }
    }
}

pub struct MultilargeNlinearWorkspace<P: NormalEquationsProblem> {
    fdf: Option<Fdf<P>>,
    params: MultilargeNlinearParameters,
    n: usize,
    p: usize,
    x: DVector<f64>,
    f: DVector<f64>,
    g: DVector<f64>,
    jtj: DMatrix<f64>,
    dx: DVector<f64>,
    niter: usize,
    // ||f|| before the last accepted step
    fnorm_prev: f64,
    status: SolverStatus,
    state: LmState,
}

impl<P: NormalEquationsProblem> MultilargeNlinearWorkspace<P> {
    /// Allocate all buffers for n residuals and p parameters.
    pub fn alloc(params: MultilargeNlinearParameters, n: usize, p: usize) -> Result<Self> {
        if n == 0 {
            return Err(MultilargeError::InvalidConfig(
                "n must be a positive integer".to_string(),
            ));
        }
        let state = LmState::alloc(&params, n, p)?;
        info!(
            "allocated {} workspace: n = {}, p = {}, scaling = {}, accel = {}",
            state.name(),
            n,
            p,
            params.scale,
            params.accel
        );

        Ok(Self {
            fdf: None,
            params,
            n,
            p,
            x: DVector::zeros(p),
            f: DVector::zeros(n),
            g: DVector::zeros(p),
            jtj: DMatrix::zeros(p, p),
            dx: DVector::zeros(p),
            niter: 0,
            fnorm_prev: 0.0,
            status: SolverStatus::Uninitialized,
            state,
        })
    }

    /// Start a solve session at x0. The problem is owned by the workspace
    /// until [`free`](Self::free).
    pub fn init(&mut self, x0: &DVector<f64>, problem: P) -> Result<()> {
        self.init_fdf(x0, Fdf::new(problem))
    }

    /// Like [`init`](Self::init) but keeps the evaluation counters of `fdf`
    pub fn init_fdf(&mut self, x0: &DVector<f64>, fdf: Fdf<P>) -> Result<()> {
        check_len("x0", self.p, x0.len())?;
        check_len("number of residuals", self.n, fdf.n())?;
        check_len("number of parameters", self.p, fdf.p())?;
        self.fdf = Some(fdf);
        self.restart(x0)
    }

    /// Re-initialize at x0 with the problem already owned by the workspace
    pub fn restart(&mut self, x0: &DVector<f64>) -> Result<()> {
        check_len("x0", self.p, x0.len())?;
        let Some(fdf) = self.fdf.as_mut() else {
            return Err(MultilargeError::InvalidState(
                "restart called before init".to_string(),
            ));
        };

        self.x.copy_from(x0);
        self.dx.fill(0.0);
        self.niter = 0;

        match self
            .state
            .init(fdf, &self.x, &mut self.f, &mut self.g, &mut self.jtj)
        {
            Ok(()) => {
                self.fnorm_prev = self.f.norm();
                self.status = SolverStatus::Initialized;
                Ok(())
            }
            Err(e) => {
                error!("initialization failed: {}", e);
                self.status = SolverStatus::EvaluatorError;
                Err(e)
            }
        }
    }

    /// Take one LM step. Errors move the workspace to a terminal state:
    /// `NoProgress` or `EvaluatorError`.
    pub fn iterate(&mut self) -> Result<()> {
        match self.status {
            SolverStatus::Initialized | SolverStatus::Iterating | SolverStatus::Converged => {}
            other => {
                return Err(MultilargeError::InvalidState(format!(
                    "cannot iterate a solver in state '{}'",
                    other
                )));
            }
        }
        let Some(fdf) = self.fdf.as_mut() else {
            return Err(MultilargeError::InvalidState(
                "no problem attached".to_string(),
            ));
        };

        let fnorm = self.f.norm();
        let result = self.state.iterate(
            fdf,
            &mut self.x,
            &mut self.f,
            &mut self.jtj,
            &mut self.g,
            &mut self.dx,
        );
        match result {
            Ok(()) => {
                self.fnorm_prev = fnorm;
                self.niter += 1;
                self.status = SolverStatus::Iterating;
                Ok(())
            }
            Err(MultilargeError::NoProgress) => {
                self.status = SolverStatus::NoProgress;
                Err(MultilargeError::NoProgress)
            }
            Err(e) => {
                error!("iteration {} failed: {}", self.niter + 1, e);
                self.status = SolverStatus::EvaluatorError;
                Err(e)
            }
        }
    }

    /// Convergence test on the last step; a passing test marks the
    /// workspace as converged.
    pub fn test(&mut self, xtol: f64, gtol: f64, ftol: f64) -> ConvergenceInfo {
        let info = test_convergence(
            &self.x,
            &self.dx,
            &self.g,
            &self.f,
            self.fnorm_prev,
            xtol,
            gtol,
            ftol,
        );
        if info.is_converged() {
            self.status = SolverStatus::Converged;
        }
        info
    }

    /// Reciprocal condition number of the current J^T J, in [0, 1]
    pub fn rcond(&self) -> Result<f64> {
        if self.status == SolverStatus::Uninitialized {
            return Err(MultilargeError::InvalidState(
                "rcond needs an initialized solver".to_string(),
            ));
        }
        Ok(self.state.rcond(&self.jtj))
    }

    /// Release the workspace and hand back the problem (if one was attached)
    pub fn free(self) -> Option<P> {
        self.fdf.map(Fdf::into_problem)
    }

    pub fn name(&self) -> &'static str {
        self.state.name()
    }

    pub fn position(&self) -> &DVector<f64> {
        &self.x
    }

    pub fn residual(&self) -> &DVector<f64> {
        &self.f
    }

    pub fn gradient(&self) -> &DVector<f64> {
        &self.g
    }

    pub fn step(&self) -> &DVector<f64> {
        &self.dx
    }

    pub fn jtj(&self) -> &DMatrix<f64> {
        &self.jtj
    }

    pub fn avratio(&self) -> f64 {
        self.state.avratio()
    }

    pub fn niter(&self) -> usize {
        self.niter
    }

    pub fn status(&self) -> SolverStatus {
        self.status
    }

    pub fn fdf(&self) -> Option<&Fdf<P>> {
        self.fdf.as_ref()
    }

    pub fn mu(&self) -> f64 {
        self.state.mu()
    }

    pub fn nu(&self) -> i64 {
        self.state.nu()
    }

    pub fn scaling_diag(&self) -> &DVector<f64> {
        self.state.scaling_diag()
    }

    pub fn scale(&self) -> ScalingMethod {
        self.state.scale()
    }

    pub fn parameters(&self) -> &MultilargeNlinearParameters {
        &self.params
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn p(&self) -> usize {
        self.p
    }
}
