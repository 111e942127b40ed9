//! Error type shared by the large-scale least squares solvers
use std::fmt;

/// Errors reported by the multilarge solvers and their collaborators
#[derive(Debug, Clone, PartialEq)]
pub enum MultilargeError {
    /// bad sizes or tunable parameters (p = 0, avmax <= 0, unknown scaling name...)
    InvalidConfig(String),
    /// a vector or matrix does not have the size the workspace was allocated for
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// user callback failed; message is passed through untouched
    Evaluation(String),
    /// operation is not allowed in the current solver state
    InvalidState(String),
    /// 15 consecutive rejected steps inside one iteration
    NoProgress,
    /// linear least squares system could not be factorized
    SingularSystem(String),
    /// config file or history file could not be read/written
    Io(String),
}

impl fmt::Display for MultilargeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MultilargeError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            MultilargeError::DimensionMismatch {
                what,
                expected,
                actual,
            } => write!(
                f,
                "dimension mismatch for {}: expected {}, got {}",
                what, expected, actual
            ),
            MultilargeError::Evaluation(msg) => write!(f, "evaluation failed: {}", msg),
            MultilargeError::InvalidState(msg) => write!(f, "invalid solver state: {}", msg),
            MultilargeError::NoProgress => {
                write!(f, "no progress made: 15 consecutive steps rejected")
            }
            MultilargeError::SingularSystem(msg) => write!(f, "singular system: {}", msg),
            MultilargeError::Io(msg) => write!(f, "i/o error: {}", msg),
        }
    }
}

impl std::error::Error for MultilargeError {}

impl From<std::io::Error> for MultilargeError {
    fn from(err: std::io::Error) -> Self {
        MultilargeError::Io(err.to_string())
    }
}

impl From<csv::Error> for MultilargeError {
    fn from(err: csv::Error) -> Self {
        MultilargeError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MultilargeError>;

/// check that a vector/matrix dimension matches the expected one
pub fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(MultilargeError::DimensionMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}
