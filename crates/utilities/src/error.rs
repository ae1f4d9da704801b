use std::error::Error;

use thiserror::Error;

/// The error type used by the binaries, any error can be converted into it.
pub type MercError = Box<dyn Error>;

/// The errors that the abstraction and dominance pipeline can report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LdsimError {
    /// The initial state of some abstraction was pruned, so the task has no solution.
    #[error("the planning task is unsolvable")]
    Unsolvable,

    /// Contradictory or out of range options, detected before any computation.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LdsimError {
    /// Convenience constructor for configuration errors.
    pub fn config(message: impl Into<String>) -> Self {
        LdsimError::Config(message.into())
    }

    /// Returns true iff this error signals an unsolvable task.
    pub fn is_unsolvable(&self) -> bool {
        matches!(self, LdsimError::Unsolvable)
    }
}
