//! Large-scale least squares solvers
//!
/// errors shared by the linear and nonlinear solvers
pub mod multilarge_errors;
/// Levenberg-Marquardt on the normal equations, with geodesic acceleration
pub mod multilarge_nlinear;
/// Tikhonov regularized linear least squares accumulated block by block (normal equations or TSQR)
pub mod multilarge_linear;
