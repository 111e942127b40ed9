//! some linear algebra functions used throughout the code
/// block-wise accumulation of A^T A and A^T y
pub mod normal_equations;
/// Cholesky factorization of the damped and scaled normal matrix
pub mod scaled_cholesky;
/// reciprocal condition number from the eigenvalues of J^T J
pub mod eigen_rcond;
