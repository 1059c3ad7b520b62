// Probe Builder Port
// External build collaborator for probes that may be built on demand

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Build errors
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Build command failed to start: {0}")]
    SpawnFailed(String),

    #[error("Build exited with code {0:?}")]
    Failed(Option<i32>),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Probe Builder trait
#[async_trait]
pub trait ProbeBuilder: Send + Sync {
    /// Run a fully rendered build command, logging to `log_path`
    ///
    /// # Arguments
    /// * `name` - Probe name (for logging)
    /// * `working_dir` - Directory the command runs in
    /// * `command` - Program followed by its arguments
    /// * `log_path` - Build log inside the run directory
    async fn build(
        &self,
        name: &str,
        working_dir: &Path,
        command: &[String],
        log_path: &Path,
    ) -> Result<(), BuildError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    /// Mock builder; optionally creates the expected artifact
    pub struct MockProbeBuilder {
        /// Files to create on a successful build
        produces: Vec<PathBuf>,
        fail: bool,
        commands: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl MockProbeBuilder {
        pub fn producing(produces: Vec<PathBuf>) -> Self {
            Self {
                produces,
                fail: false,
                commands: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn failing() -> Self {
            Self {
                produces: Vec::new(),
                fail: true,
                commands: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Commands received, in order
        pub fn commands(&self) -> Vec<Vec<String>> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProbeBuilder for MockProbeBuilder {
        async fn build(
            &self,
            _name: &str,
            _working_dir: &Path,
            command: &[String],
            log_path: &Path,
        ) -> Result<(), BuildError> {
            self.commands.lock().unwrap().push(command.to_vec());
            std::fs::write(log_path, command.join(" "))
                .map_err(|e| BuildError::IoError(e.to_string()))?;

            if self.fail {
                return Err(BuildError::Failed(Some(2)));
            }

            for path in &self.produces {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| BuildError::IoError(e.to_string()))?;
                }
                std::fs::write(path, b"#!/bin/sh\n")
                    .map_err(|e| BuildError::IoError(e.to_string()))?;
            }
            Ok(())
        }
    }
}
