//! examples of usage of RustedMultiLarge
/// nonlinear and linear large least squares examples
pub mod multilarge_examples;
