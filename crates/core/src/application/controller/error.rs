// Run Controller Errors (fatal conditions only)

use thiserror::Error;

use super::state::RunState;
use crate::domain::{exit_code, DomainError};

/// Conditions that stop the pipeline before a summary exists
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Run interrupted during {0}")]
    Interrupted(RunState),

    #[error("Artifact error: {0}")]
    Artifact(String),
}

impl RunError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Interrupted(_) => exit_code::INTERRUPTED,
            _ => exit_code::FATAL,
        }
    }
}

impl From<DomainError> for RunError {
    fn from(err: DomainError) -> Self {
        RunError::Configuration(err.to_string())
    }
}

impl From<crate::AppError> for RunError {
    fn from(err: crate::AppError) -> Self {
        RunError::Artifact(err.to_string())
    }
}
