// System Snapshot Port
// Best-effort host/GPU description written at the start of a run

use async_trait::async_trait;

/// System Snapshot trait
#[async_trait]
pub trait SystemSnapshot: Send + Sync {
    /// Describe the host and target device as plain text (never fails)
    async fn collect(&self, device_index: u32) -> String;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;

    /// Mock snapshot returning fixed text
    pub struct MockSystemSnapshot;

    #[async_trait]
    impl SystemSnapshot for MockSystemSnapshot {
        async fn collect(&self, device_index: u32) -> String {
            format!("host: mock\ndevice: {}\n", device_index)
        }
    }
}
