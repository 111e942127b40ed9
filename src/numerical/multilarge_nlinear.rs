//! Large-scale nonlinear least squares: Levenberg-Marquardt working on the
//! normal equations J^T J, J^T f only, so the n x p Jacobian never has to fit
//! in memory.
//!
//! Example
//! ```no_run
//! use RustedMultiLarge::numerical::multilarge_nlinear::*;
//! use nalgebra::{DMatrix, DVector};
//! // fit y = a * exp(-b t) to 10 points
//! let t: Vec<f64> = (0..10).map(|i| i as f64 * 0.3).collect();
//! let y: Vec<f64> = t.iter().map(|ti| 2.0 * (-0.7 * ti).exp()).collect();
//! let t2 = t.clone();
//! let problem = ClosureProblem::new(
//!     10,
//!     2,
//!     move |x, f| {
//!         for i in 0..10 {
//!             f[i] = x[0] * (-x[1] * t[i]).exp() - y[i];
//!         }
//!         Ok(())
//!     },
//!     move |x, r, jtr, jtj| {
//!         let j = DMatrix::from_fn(10, 2, |i, k| {
//!             let e = (-x[1] * t2[i]).exp();
//!             if k == 0 { e } else { -x[0] * t2[i] * e }
//!         });
//!         jtr.copy_from(&(j.transpose() * r));
//!         if let Some(jtj) = jtj {
//!             jtj.copy_from(&(j.transpose() * &j));
//!         }
//!         Ok(())
//!     },
//! );
//! let mut w = MultilargeNlinearWorkspace::alloc(MultilargeNlinearParameters::default(), 10, 2).unwrap();
//! w.init(&DVector::from_vec(vec![1.0, 1.0]), problem).unwrap();
//! let report = solve(&mut w, &DriverConfig::default(), None).unwrap();
//! println!("{:?}: x = {}", report.outcome, w.position());
//! ```
/// residual, normal equations and fvv callbacks plus evaluation counters
pub mod fdf;
/// Levenberg, Marquardt and More scaling of the damping term
pub mod scaling;
pub mod parameters;
/// LM step with Nielsen damping update and geodesic acceleration
pub mod lm;
pub mod workspace;
pub mod convergence;
/// driver loop and logging wrapper
pub mod driver;
/// Tikhonov regularized problems
pub mod regularized;
#[cfg(test)]
mod multilarge_nlinear_tests;

pub use convergence::{ConvergenceInfo, test_convergence};
pub use driver::{DriverConfig, DriverOutcome, DriverReport, driver, solve};
pub use fdf::{ClosureProblem, Fdf, NormalEquationsProblem};
pub use parameters::{MultilargeNlinearParameters, SolverTask};
pub use regularized::TikhonovProblem;
pub use scaling::ScalingMethod;
pub use workspace::{MultilargeNlinearWorkspace, SolverStatus};
