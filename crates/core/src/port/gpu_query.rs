// GPU Query Port
// Hardware compute-capability lookup used to parameterize one probe's build

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::ComputeCapability;

/// Query errors
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Query tool failed: {0}")]
    ToolFailed(String),

    #[error("Unparseable query output: {0}")]
    Parse(String),
}

/// GPU Query trait
#[async_trait]
pub trait GpuQuery: Send + Sync {
    /// Compute capability (`major.minor`) of the given device
    async fn compute_capability(&self, device_index: u32) -> Result<ComputeCapability, QueryError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;

    /// Mock query returning a fixed capability (or an error)
    pub struct MockGpuQuery {
        capability: Option<ComputeCapability>,
    }

    impl MockGpuQuery {
        pub fn new(major: u32, minor: u32) -> Self {
            Self {
                capability: Some(ComputeCapability { major, minor }),
            }
        }

        pub fn unavailable() -> Self {
            Self { capability: None }
        }
    }

    #[async_trait]
    impl GpuQuery for MockGpuQuery {
        async fn compute_capability(
            &self,
            _device_index: u32,
        ) -> Result<ComputeCapability, QueryError> {
            self.capability
                .ok_or_else(|| QueryError::ToolFailed("nvidia-smi not found".to_string()))
        }
    }
}
