// Probe Outcome - what Process Capture observed for one probe invocation

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Result of running one probe; created once, never mutated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub name: String,
    /// Log file holding the captured combined output
    pub log_path: PathBuf,
    /// Exit code (`128 + signal` when terminated by a signal, None if never started)
    pub exit_code: Option<i32>,
    /// Whether the orchestrator delivered the soft interrupt
    pub interrupted: bool,
    /// Bytes relayed into the log file
    pub bytes_captured: u64,
    pub duration_ms: i64,
    /// Spawn failure reason when the process never started
    pub spawn_error: Option<String>,
}

impl ProbeOutcome {
    /// Outcome for a probe whose process could not be started
    pub fn not_started(name: impl Into<String>, log_path: PathBuf, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            log_path,
            exit_code: None,
            interrupted: false,
            bytes_captured: 0,
            duration_ms: 0,
            spawn_error: Some(reason.into()),
        }
    }

    pub fn started(&self) -> bool {
        self.spawn_error.is_none()
    }

    /// Non-zero exit that the orchestrator did not cause itself
    pub fn exited_abnormally(&self) -> bool {
        !self.interrupted && matches!(self.exit_code, Some(code) if code != 0)
    }
}
