use log::{debug, info};
use nalgebra::DVector;

/// Result of the convergence test after one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceInfo {
    NoConvergence = 0,
    ParameterChange = 1,
    GradientSmall = 2,
    FunctionChange = 3,
}

impl ConvergenceInfo {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn is_converged(&self) -> bool {
        *self != ConvergenceInfo::NoConvergence
    }
}

impl From<i32> for ConvergenceInfo {
    fn from(code: i32) -> Self {
        match code {
            1 => ConvergenceInfo::ParameterChange,
            2 => ConvergenceInfo::GradientSmall,
            3 => ConvergenceInfo::FunctionChange,
            _ => ConvergenceInfo::NoConvergence,
        }
    }
}

impl std::fmt::Display for ConvergenceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvergenceInfo::NoConvergence => write!(f, "No convergence"),
            ConvergenceInfo::ParameterChange => write!(f, "Converged: parameter change small"),
            ConvergenceInfo::GradientSmall => write!(f, "Converged: gradient small"),
            ConvergenceInfo::FunctionChange => write!(f, "Converged: function change small"),
        }
    }
}

/////////////////////////////CONVERGENCE CRITERIA///////////////////////////////////////////////////////////
/// Tests are applied in order and the first one that passes is reported.
///
/// - x: |dx_i| < xtol^2 + xtol |x_i| for every i
/// - g: max_i |g_i| max(|x_i|, 1) <= gtol max(||f||^2 / 2, 1)
/// - f: ||f_prev|| - ||f|| <= ftol max(||f||, 1)
#[allow(clippy::too_many_arguments)]
pub fn test_convergence(
    x: &DVector<f64>,
    dx: &DVector<f64>,
    g: &DVector<f64>,
    f: &DVector<f64>,
    fnorm_prev: f64,
    xtol: f64,
    gtol: f64,
    ftol: f64,
) -> ConvergenceInfo {
    debug!("Checking convergence: xtol = {}, gtol = {}, ftol = {}", xtol, gtol, ftol);

    // ═══════════════════════════════════════════════════════════════════════
    // TEST 1: PARAMETER CHANGE (xtol)
    // ═══════════════════════════════════════════════════════════════════════
    if test_parameter_change(dx, x, xtol) {
        info!("CONVERGED: parameter change test passed, ||dx|| = {}", dx.norm());
        return ConvergenceInfo::ParameterChange;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TEST 2: GRADIENT (gtol)
    // ═══════════════════════════════════════════════════════════════════════
    let fnorm = f.norm();
    let phi = 0.5 * fnorm * fnorm;
    let gnorm = scaled_infnorm(x, g);
    if gnorm <= gtol * phi.max(1.0) {
        info!(
            "CONVERGED: gradient test passed, gnorm = {} <= {}",
            gnorm,
            gtol * phi.max(1.0)
        );
        return ConvergenceInfo::GradientSmall;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TEST 3: FUNCTION CHANGE (ftol)
    // ═══════════════════════════════════════════════════════════════════════
    if fnorm_prev - fnorm <= ftol * fnorm.max(1.0) {
        info!(
            "CONVERGED: function change test passed, ||f|| {} -> {}",
            fnorm_prev, fnorm
        );
        return ConvergenceInfo::FunctionChange;
    }

    debug!("no convergence: gnorm = {}, ||f|| = {}", gnorm, fnorm);
    ConvergenceInfo::NoConvergence
}

fn test_parameter_change(dx: &DVector<f64>, x: &DVector<f64>, xtol: f64) -> bool {
    x.iter()
        .zip(dx.iter())
        .all(|(xi, dxi)| dxi.abs() < xtol * xtol + xtol * xi.abs())
}

/// max_i |g_i| * max(|x_i|, 1)
fn scaled_infnorm(x: &DVector<f64>, g: &DVector<f64>) -> f64 {
    x.iter()
        .zip(g.iter())
        .map(|(xi, gi)| gi.abs() * xi.abs().max(1.0))
        .fold(0.0, f64::max)
}
