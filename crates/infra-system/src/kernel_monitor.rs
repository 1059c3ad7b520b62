// Background kernel monitor (dmesg follower)
// reason: nix for SIGTERM delivery, matching the graceful-then-forced stop of probe processes
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use gpuval_core::port::kernel_monitor::{KernelMonitor, MonitorHandle};
use gpuval_core::port::process_capture::CaptureError;

/// A source that dies this quickly with a non-zero status never started
const STARTUP_GRACE: Duration = Duration::from_millis(250);

/// Time the source gets to exit after SIGTERM before it is killed
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Kernel Monitor that follows new kernel messages into the run's log
///
/// The message source writes straight into the log file, so the log is
/// complete as soon as the source process has exited. It runs in its own
/// process group, which stop and abort signal as a whole.
pub struct DmesgMonitor {
    program: PathBuf,
    args: Vec<String>,
}

impl DmesgMonitor {
    /// `dmesg --follow-new` (messages emitted after start only)
    pub fn new() -> Self {
        Self::with_command("dmesg", vec!["--follow-new".to_string()])
    }

    /// Use another long-running message source
    ///
    /// # Example
    /// ```text
    /// DmesgMonitor::with_command("journalctl", vec!["-k".into(), "-f".into()])
    /// ```
    pub fn with_command(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Default for DmesgMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KernelMonitor for DmesgMonitor {
    async fn start(&self, log_path: &Path) -> Result<Box<dyn MonitorHandle>, CaptureError> {
        let log = std::fs::File::create(log_path)?;
        let log_err = log.try_clone()?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            command.process_group(0);
        }
        let spawned = command.spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let _ = std::fs::remove_file(log_path);
                return Err(CaptureError::SpawnFailed(format!(
                    "{}: {}",
                    self.program.display(),
                    e
                )));
            }
        };

        if let Ok(status) = tokio::time::timeout(STARTUP_GRACE, child.wait()).await {
            let status = status?;
            if !status.success() {
                let reason = std::fs::read_to_string(log_path).unwrap_or_default();
                let _ = std::fs::remove_file(log_path);
                return Err(CaptureError::SpawnFailed(format!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    status,
                    reason.trim()
                )));
            }
            warn!(program = %self.program.display(), "Kernel message source exited right after start");
        }

        debug!(program = %self.program.display(), pid = ?child.id(), "Kernel message source running");
        Ok(Box::new(DmesgHandle { child: Some(child) }))
    }
}

struct DmesgHandle {
    /// None once stopped
    child: Option<Child>,
}

#[async_trait]
impl MonitorHandle for DmesgHandle {
    async fn stop(&mut self) -> Result<(), CaptureError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if child.try_wait()?.is_none() {
            terminate(&mut child)?;
            match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
                Ok(status) => {
                    debug!(status = ?status, "Kernel message source exited");
                }
                Err(_) => {
                    warn!("Kernel message source ignored SIGTERM, killing");
                    kill_group(&mut child);
                    child.kill().await?;
                }
            }
        }

        debug!("Kernel message source stopped");
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(mut child) = self.child.take() {
            kill_group(&mut child);
            let _ = child.start_kill();
        }
    }

    fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> Result<(), CaptureError> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return Ok(());
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(CaptureError::Signal(format!("SIGTERM failed: {}", e))),
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> Result<(), CaptureError> {
    child
        .start_kill()
        .map_err(|e| CaptureError::Signal(e.to_string()))
}

#[cfg(unix)]
fn kill_group(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pgid) = child.id().and_then(|id| i32::try_from(id).ok()) {
        let _ = killpg(Pid::from_raw(pgid), Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &mut Child) {}
