//! Driver loop: iterate until the convergence test passes, the iteration
//! budget is spent or an error stops the solve.
use super::convergence::ConvergenceInfo;
use super::fdf::NormalEquationsProblem;
use super::workspace::MultilargeNlinearWorkspace;
use crate::Utils::logger::{init_logger, parse_loglevel};
use crate::numerical::multilarge_errors::{MultilargeError, Result};
use log::{error, info, warn};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    pub maxiter: usize,
    pub xtol: f64,
    pub gtol: f64,
    pub ftol: f64,
    /// "debug", "info", "warn", "error", "off"/"none"; None means "info"
    pub loglevel: Option<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            maxiter: 100,
            xtol: 1e-8,
            gtol: 1e-8,
            ftol: 0.0,
            loglevel: None,
        }
    }
}

impl DriverConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, tol) in [("xtol", self.xtol), ("gtol", self.gtol), ("ftol", self.ftol)] {
            if !(tol >= 0.0) || !tol.is_finite() {
                return Err(MultilargeError::InvalidConfig(format!(
                    "{} must be a non-negative number, got {}",
                    name, tol
                )));
            }
        }
        parse_loglevel(self.loglevel.as_deref())?;
        Ok(())
    }
}

/// How a driver run ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverOutcome {
    Converged(ConvergenceInfo),
    MaxIterations,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriverReport {
    pub outcome: DriverOutcome,
    /// iterations taken by this driver run
    pub niter: usize,
    /// result of the last convergence test
    pub info: ConvergenceInfo,
}

impl DriverReport {
    pub fn converged(&self) -> bool {
        matches!(self.outcome, DriverOutcome::Converged(_))
    }
}

pub type IterationCallback<'a, P> = dyn FnMut(usize, &MultilargeNlinearWorkspace<P>) + 'a;

/// Run the solver on an initialized workspace.
///
/// The callback is invoked after every successful iteration with the
/// iteration number (starting at 1) and the workspace. Any iterate error
/// (including no progress) stops the run and is returned.
pub fn driver<P: NormalEquationsProblem>(
    w: &mut MultilargeNlinearWorkspace<P>,
    config: &DriverConfig,
    mut callback: Option<&mut IterationCallback<'_, P>>,
) -> Result<DriverReport> {
    config.validate()?;
    let begin = Instant::now();
    let mut info = ConvergenceInfo::NoConvergence;
    let mut iter = 0usize;

    while iter < config.maxiter {
        if let Err(e) = w.iterate() {
            error!("solver stopped at iteration {}: {}", iter + 1, e);
            return Err(e);
        }
        iter += 1;

        if let Some(cb) = callback.as_mut() {
            cb(iter, &*w);
        }

        info = w.test(config.xtol, config.gtol, config.ftol);
        if info.is_converged() {
            info!(
                "{} after {} iterations ({:?}): ||f|| = {}",
                info,
                iter,
                begin.elapsed(),
                w.residual().norm()
            );
            return Ok(DriverReport {
                outcome: DriverOutcome::Converged(info),
                niter: iter,
                info,
            });
        }
    }

    warn!(
        "maximum number of iterations ({}) reached, ||f|| = {}",
        config.maxiter,
        w.residual().norm()
    );
    Ok(DriverReport {
        outcome: DriverOutcome::MaxIterations,
        niter: iter,
        info,
    })
}

/// Wrapper around [`driver`] that sets up terminal logging from `config.loglevel`
pub fn solve<P: NormalEquationsProblem>(
    w: &mut MultilargeNlinearWorkspace<P>,
    config: &DriverConfig,
    callback: Option<&mut IterationCallback<'_, P>>,
) -> Result<DriverReport> {
    init_logger(config.loglevel.as_deref())?;
    info!("{} solver started", w.name());
    let report = driver(w, config, callback)?;
    info!("{} solver ended: {:?}", w.name(), report.outcome);
    Ok(report)
}
