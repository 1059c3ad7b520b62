// Scoped ownership of the Background Kernel Monitor

use std::path::Path;
use tracing::{info, warn};

use crate::port::{KernelMonitor, MonitorHandle};

/// Holds the running monitor; terminates it on release or drop
pub struct MonitorGuard {
    handle: Option<Box<dyn MonitorHandle>>,
}

impl MonitorGuard {
    /// Start the monitor; a start failure is logged and yields an inactive guard
    pub async fn acquire(monitor: &dyn KernelMonitor, log_path: &Path) -> Self {
        match monitor.start(log_path).await {
            Ok(handle) => {
                info!(log = %log_path.display(), "Kernel monitor started");
                Self {
                    handle: Some(handle),
                }
            }
            Err(e) => {
                warn!(error = %e, "Kernel monitor unavailable, kernel check will report WARN");
                Self { handle: None }
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the monitor and wait for its log to be flushed
    pub async fn release(mut self) {
        if let Some(mut handle) = self.handle.take() {
            match handle.stop().await {
                Ok(()) => info!("Kernel monitor stopped"),
                Err(e) => {
                    warn!(error = %e, "Kernel monitor stop failed, aborting it");
                    handle.abort();
                }
            }
        }
    }
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            warn!("Kernel monitor released without orderly stop, aborting it");
            handle.abort();
        }
    }
}
