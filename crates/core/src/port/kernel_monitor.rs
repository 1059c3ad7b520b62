// Background Kernel Monitor Port
// Long-lived capture of kernel diagnostic messages into a dedicated log

use async_trait::async_trait;
use std::path::Path;

use super::process_capture::CaptureError;

/// Running monitor; owned by the run controller's guard
#[async_trait]
pub trait MonitorHandle: Send {
    /// Terminate the message source and flush the log (idempotent)
    async fn stop(&mut self) -> Result<(), CaptureError>;

    /// Best-effort synchronous termination for drop paths
    fn abort(&mut self);

    /// Whether the message source is still alive
    fn is_running(&mut self) -> bool;
}

/// Kernel Monitor trait
#[async_trait]
pub trait KernelMonitor: Send + Sync {
    /// Start appending kernel messages to `log_path`
    ///
    /// # Errors
    /// - CaptureError::SpawnFailed if the message source cannot be started
    async fn start(&self, log_path: &Path) -> Result<Box<dyn MonitorHandle>, CaptureError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Mock monitor; writes fixed lines and tracks liveness
    pub struct MockKernelMonitor {
        lines: Vec<String>,
        fail_start: bool,
        running: Arc<AtomicBool>,
        starts: Arc<AtomicUsize>,
    }

    impl MockKernelMonitor {
        pub fn new(lines: &[&str]) -> Self {
            Self {
                lines: lines.iter().map(|l| l.to_string()).collect(),
                fail_start: false,
                running: Arc::new(AtomicBool::new(false)),
                starts: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn failing() -> Self {
            Self {
                fail_start: true,
                ..Self::new(&[])
            }
        }

        pub fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        pub fn start_count(&self) -> usize {
            self.starts.load(Ordering::SeqCst)
        }
    }

    struct MockHandle {
        running: Arc<AtomicBool>,
    }

    #[async_trait]
    impl MonitorHandle for MockHandle {
        async fn stop(&mut self) -> Result<(), CaptureError> {
            self.running.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn abort(&mut self) {
            self.running.store(false, Ordering::SeqCst);
        }

        fn is_running(&mut self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KernelMonitor for MockKernelMonitor {
        async fn start(&self, log_path: &Path) -> Result<Box<dyn MonitorHandle>, CaptureError> {
            if self.fail_start {
                return Err(CaptureError::SpawnFailed("dmesg: permission denied".to_string()));
            }

            let mut body = self.lines.join("\n");
            if !body.is_empty() {
                body.push('\n');
            }
            std::fs::write(log_path, body)?;

            self.starts.fetch_add(1, Ordering::SeqCst);
            self.running.store(true, Ordering::SeqCst);
            Ok(Box::new(MockHandle {
                running: Arc::clone(&self.running),
            }))
        }
    }
}
