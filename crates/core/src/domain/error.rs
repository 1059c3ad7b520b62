// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid run identifier: {0}")]
    InvalidRunId(String),

    #[error("Invalid installation root: {0}")]
    InvalidInstallRoot(String),

    #[error("Invalid duration for {name}: {reason}")]
    InvalidDuration { name: String, reason: String },

    #[error("Invalid compute capability: {0}")]
    InvalidComputeCapability(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
