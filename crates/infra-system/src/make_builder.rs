// On-demand probe builder
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{info, warn};

use gpuval_core::port::probe_builder::{BuildError, ProbeBuilder};
use gpuval_core::port::process_capture::CaptureError;

use crate::tee_capture::tee_process;

/// Runs a probe's build command (usually `make`) with its output tee'd
/// into the run's build log
pub struct MakeBuilder {
    echo: bool,
}

impl MakeBuilder {
    pub fn new(echo: bool) -> Self {
        Self { echo }
    }
}

#[async_trait]
impl ProbeBuilder for MakeBuilder {
    async fn build(
        &self,
        name: &str,
        working_dir: &Path,
        command: &[String],
        log_path: &Path,
    ) -> Result<(), BuildError> {
        let Some((program, args)) = command.split_first() else {
            return Err(BuildError::SpawnFailed(format!("empty build command for {}", name)));
        };

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(working_dir);

        info!(probe = %name, working_dir = %working_dir.display(), "Running build");
        let run = tee_process(cmd, log_path, self.echo, None)
            .await
            .map_err(|e| match e {
                CaptureError::SpawnFailed(reason) => BuildError::SpawnFailed(reason),
                other => BuildError::IoError(other.to_string()),
            })?;

        if run.exit_code != Some(0) {
            warn!(probe = %name, exit_code = ?run.exit_code, log = %log_path.display(), "Build failed");
            return Err(BuildError::Failed(run.exit_code));
        }

        info!(probe = %name, elapsed_ms = run.elapsed.as_millis() as u64, "Build finished");
        Ok(())
    }
}
