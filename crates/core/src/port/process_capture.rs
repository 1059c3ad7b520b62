// Process Capture Port
// Abstraction for running one probe process and recording its output

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::domain::{ProbeInvocation, ProbeOutcome};

/// Capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Signal delivery failed: {0}")]
    Signal(String),
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::IoError(err.to_string())
    }
}

/// Process Capture trait
///
/// Implementations spawn the invocation, relay its combined stdout/stderr to
/// the console and to `log_path` (byte-identical), honour the invocation's
/// cancel mode, and return once the process has exited. A non-zero exit is
/// an outcome, not an error.
#[async_trait]
pub trait ProcessCapture: Send + Sync {
    /// Run a probe to completion (or soft interrupt) and record its outcome
    ///
    /// # Errors
    /// - CaptureError::SpawnFailed if the process cannot be started
    /// - CaptureError::IoError if the log file cannot be written
    async fn capture(
        &self,
        invocation: &ProbeInvocation,
        log_path: &Path,
    ) -> Result<ProbeOutcome, CaptureError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Scripted behaviour for one probe name
    #[derive(Debug, Clone)]
    pub enum MockRun {
        /// Write `output` to the log and exit with `exit_code`
        Output { output: String, exit_code: i32 },
        /// Fail to spawn (no log written)
        SpawnFail(String),
        /// Never finish (used to exercise external interruption)
        Hang,
    }

    /// Mock Process Capture that writes scripted output to the real log path
    pub struct MockProcessCapture {
        runs: HashMap<String, MockRun>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl MockProcessCapture {
        pub fn new() -> Self {
            Self {
                runs: HashMap::new(),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn with(mut self, name: &str, run: MockRun) -> Self {
            self.runs.insert(name.to_string(), run);
            self
        }

        pub fn with_output(self, name: &str, output: &str, exit_code: i32) -> Self {
            self.with(
                name,
                MockRun::Output {
                    output: output.to_string(),
                    exit_code,
                },
            )
        }

        /// Probe names in invocation order
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Default for MockProcessCapture {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ProcessCapture for MockProcessCapture {
        async fn capture(
            &self,
            invocation: &ProbeInvocation,
            log_path: &Path,
        ) -> Result<ProbeOutcome, CaptureError> {
            self.calls.lock().unwrap().push(invocation.name.clone());

            let run = self
                .runs
                .get(&invocation.name)
                .cloned()
                .unwrap_or(MockRun::Output {
                    output: String::new(),
                    exit_code: 0,
                });

            match run {
                MockRun::Output { output, exit_code } => {
                    std::fs::write(log_path, output.as_bytes())?;
                    Ok(ProbeOutcome {
                        name: invocation.name.clone(),
                        log_path: log_path.to_path_buf(),
                        exit_code: Some(exit_code),
                        interrupted: false,
                        bytes_captured: output.len() as u64,
                        duration_ms: 1,
                        spawn_error: None,
                    })
                }
                MockRun::SpawnFail(reason) => Err(CaptureError::SpawnFailed(reason)),
                MockRun::Hang => std::future::pending().await,
            }
        }
    }
}
