// Tee-style process capture
// reason: tokio process + mpsc relay so console and log receive identical bytes
use async_trait::async_trait;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use gpuval_core::domain::{CancelMode, ProbeInvocation, ProbeOutcome};
use gpuval_core::port::process_capture::{CaptureError, ProcessCapture};

const READ_CHUNK: usize = 8192;
const RELAY_DEPTH: usize = 64;

/// Which pipe a chunk came from (console echo keeps them apart)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pipe {
    Stdout,
    Stderr,
}

/// What a tee'd process did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeeRun {
    /// Exit code, `128 + signal` when killed by a signal
    pub exit_code: Option<i32>,
    pub interrupted: bool,
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Time a probe's leftover processes get to release its output pipes
const LEFTOVER_GRACE: Duration = Duration::from_secs(2);

/// Console sinks for echoed output, one per pipe
struct Echo<O, E> {
    stdout: O,
    stderr: E,
}

impl Echo<tokio::io::Stdout, tokio::io::Stderr> {
    fn console() -> Self {
        Self {
            stdout: tokio::io::stdout(),
            stderr: tokio::io::stderr(),
        }
    }
}

/// Signals for a probe's process group
#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Interrupt,
    Terminate,
    Kill,
}

/// Deliver `signal` to the group; false when nothing is left in it
#[cfg(unix)]
fn signal_group(pgid: Option<i32>, signal: GroupSignal) -> Result<bool, CaptureError> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = pgid else {
        return Ok(false);
    };
    let sig = match signal {
        GroupSignal::Interrupt => Signal::SIGINT,
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(pgid), sig) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(CaptureError::Signal(format!("{} failed: {}", sig.as_str(), e))),
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: Option<i32>, _signal: GroupSignal) -> Result<bool, CaptureError> {
    Ok(false)
}

/// Kills the child's process group if the capture future is dropped mid-run
struct GroupGuard {
    pgid: Option<i32>,
}

impl GroupGuard {
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if self.pgid.is_some() {
            warn!(pgid = ?self.pgid, "Capture cancelled, killing probe process group");
            let _ = signal_group(self.pgid, GroupSignal::Kill);
        }
    }
}

/// Spawn `command`, relay its output to `log_path` (and the console when
/// `echo` is set), and wait for it to exit.
///
/// With `interrupt_after`, the process group receives SIGINT once the limit
/// passes and the function keeps waiting for the process to wind down on its
/// own. The log file is created only after a successful spawn. Processes the
/// probe leaves behind in its group are terminated once it exits.
pub async fn tee_process(
    command: Command,
    log_path: &Path,
    echo: bool,
    interrupt_after: Option<Duration>,
) -> Result<TeeRun, CaptureError> {
    let console = echo.then(Echo::console);
    tee_process_to(command, log_path, console, interrupt_after).await
}

async fn tee_process_to<O, E>(
    mut command: Command,
    log_path: &Path,
    console: Option<Echo<O, E>>,
    interrupt_after: Option<Duration>,
) -> Result<TeeRun, CaptureError>
where
    O: AsyncWrite + Unpin + Send + 'static,
    E: AsyncWrite + Unpin + Send + 'static,
{
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    {
        command.process_group(0);
    }

    let started = Instant::now();
    let mut child = command
        .spawn()
        .map_err(|e| CaptureError::SpawnFailed(e.to_string()))?;
    let pgid = child.id().and_then(|id| i32::try_from(id).ok());
    let mut guard = GroupGuard { pgid };

    let log = tokio::fs::File::create(log_path).await?;
    let (tx, rx) = mpsc::channel(RELAY_DEPTH);
    let mut pumps = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(stdout, Pipe::Stdout, tx.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(stderr, Pipe::Stderr, tx.clone())));
    }
    drop(tx);
    let relay = tokio::spawn(relay(rx, log, console));

    let (status, interrupted) = wait_with_deadline(&mut child, pgid, interrupt_after).await?;
    guard.disarm();

    match signal_group(pgid, GroupSignal::Terminate) {
        Ok(true) => warn!(pgid = ?pgid, "Probe left processes behind, terminating its process group"),
        Ok(false) => {}
        Err(e) => debug!(pgid = ?pgid, error = %e, "Could not signal leftover processes"),
    }
    let bytes = drain(relay, &pumps, pgid).await?;

    Ok(TeeRun {
        exit_code: exit_code(status),
        interrupted,
        bytes,
        elapsed: started.elapsed(),
    })
}

/// Wait for the relay to see end-of-output on both pipes
///
/// Leftovers that ignore SIGTERM are killed after a grace period. Pipes held
/// open from outside the group are abandoned so the capture always returns.
async fn drain(
    mut relay: JoinHandle<Result<u64, CaptureError>>,
    pumps: &[JoinHandle<()>],
    pgid: Option<i32>,
) -> Result<u64, CaptureError> {
    let joined = match tokio::time::timeout(LEFTOVER_GRACE, &mut relay).await {
        Ok(joined) => joined,
        Err(_) => {
            warn!(pgid = ?pgid, "Probe output still open after exit, killing its process group");
            if let Err(e) = signal_group(pgid, GroupSignal::Kill) {
                debug!(pgid = ?pgid, error = %e, "Could not kill leftover processes");
            }
            match tokio::time::timeout(LEFTOVER_GRACE, &mut relay).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("Abandoning probe output held open outside its process group");
                    for pump in pumps {
                        pump.abort();
                    }
                    relay.await
                }
            }
        }
    };
    joined.map_err(|e| CaptureError::IoError(format!("relay task failed: {}", e)))?
}

async fn wait_with_deadline(
    child: &mut Child,
    pgid: Option<i32>,
    interrupt_after: Option<Duration>,
) -> Result<(ExitStatus, bool), CaptureError> {
    let Some(limit) = interrupt_after else {
        return Ok((child.wait().await?, false));
    };

    tokio::select! {
        status = child.wait() => return Ok((status?, false)),
        _ = tokio::time::sleep(limit) => {}
    }

    info!(pgid = ?pgid, limit_secs = limit.as_secs(), "Time box reached, sending SIGINT");
    send_interrupt(child, pgid)?;
    Ok((child.wait().await?, true))
}

#[cfg(unix)]
fn send_interrupt(_child: &mut Child, pgid: Option<i32>) -> Result<(), CaptureError> {
    // ESRCH: raced with a natural exit
    signal_group(pgid, GroupSignal::Interrupt).map(|_| ())
}

#[cfg(not(unix))]
fn send_interrupt(child: &mut Child, _pgid: Option<i32>) -> Result<(), CaptureError> {
    child
        .start_kill()
        .map_err(|e| CaptureError::Signal(e.to_string()))
}

fn exit_code(status: ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(128 + signal);
        }
    }
    status.code()
}

async fn pump<R>(mut reader: R, pipe: Pipe, tx: mpsc::Sender<(Pipe, Vec<u8>)>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send((pipe, buf[..n].to_vec())).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(pipe = ?pipe, error = %e, "Pipe read failed");
                break;
            }
        }
    }
}

/// Single writer: chunks reach the log and the console in arrival order
async fn relay<O, E>(
    mut rx: mpsc::Receiver<(Pipe, Vec<u8>)>,
    mut log: tokio::fs::File,
    mut console: Option<Echo<O, E>>,
) -> Result<u64, CaptureError>
where
    O: AsyncWrite + Unpin + Send,
    E: AsyncWrite + Unpin + Send,
{
    let mut total = 0u64;

    while let Some((pipe, chunk)) = rx.recv().await {
        log.write_all(&chunk).await?;
        if let Some(echo) = console.as_mut() {
            // Console trouble must not cost us the log
            let written = match pipe {
                Pipe::Stdout => echo.stdout.write_all(&chunk).await,
                Pipe::Stderr => echo.stderr.write_all(&chunk).await,
            };
            if let Err(e) = written {
                debug!(error = %e, "Console echo failed");
            }
        }
        total += chunk.len() as u64;
    }

    log.flush().await?;
    log.sync_all().await?;
    if let Some(echo) = console.as_mut() {
        let _ = echo.stdout.flush().await;
        let _ = echo.stderr.flush().await;
    }
    Ok(total)
}

/// Process Capture over real child processes
pub struct TeeCapture {
    echo: bool,
}

impl TeeCapture {
    /// Create a capture adapter
    ///
    /// # Arguments
    /// * `echo` - Also relay probe output to this process's stdout/stderr
    pub fn new(echo: bool) -> Self {
        Self { echo }
    }
}

impl Default for TeeCapture {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl ProcessCapture for TeeCapture {
    async fn capture(
        &self,
        invocation: &ProbeInvocation,
        log_path: &Path,
    ) -> Result<ProbeOutcome, CaptureError> {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args).current_dir(&invocation.working_dir);

        let interrupt_after = match invocation.cancel {
            CancelMode::None => None,
            CancelMode::InterruptAfter(limit) => Some(limit),
        };

        let run = tee_process(command, log_path, self.echo, interrupt_after).await?;

        debug!(
            probe = %invocation.name,
            bytes = run.bytes,
            elapsed_ms = run.elapsed.as_millis() as u64,
            "Capture finished"
        );

        Ok(ProbeOutcome {
            name: invocation.name.clone(),
            log_path: log_path.to_path_buf(),
            exit_code: run.exit_code,
            interrupted: run.interrupted,
            bytes_captured: run.bytes,
            duration_ms: i64::try_from(run.elapsed.as_millis()).unwrap_or(i64::MAX),
            spawn_error: None,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::{process_gone, read_pid};
    use std::path::PathBuf;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    /// In-memory console; clones share one buffer
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl AsyncWrite for SharedSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn invocation(dir: &Path, script: &str, cancel: CancelMode) -> ProbeInvocation {
        let path = dir.join("probe.sh");
        std::fs::write(&path, script).unwrap();
        ProbeInvocation {
            name: "probe".to_string(),
            program: PathBuf::from("/bin/sh"),
            args: vec![path.display().to_string()],
            working_dir: dir.to_path_buf(),
            cancel,
        }
    }

    #[tokio::test]
    async fn test_log_holds_stdout_and_stderr_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let inv = invocation(
            dir.path(),
            "printf 'Result = PASS\\n'\nprintf 'warn line\\n' >&2\nexit 0\n",
            CancelMode::None,
        );
        let log = dir.path().join("probe.log");

        let outcome = TeeCapture::new(false).capture(&inv, &log).await.unwrap();

        let text = std::fs::read_to_string(&log).unwrap();
        assert!(text.contains("Result = PASS\n"));
        assert!(text.contains("warn line\n"));
        assert_eq!(outcome.bytes_captured, text.len() as u64);
        assert_eq!(outcome.exit_code, Some(0));
        assert!(!outcome.interrupted);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let inv = invocation(dir.path(), "echo partial\nexit 3\n", CancelMode::None);
        let log = dir.path().join("probe.log");

        let outcome = TeeCapture::new(false).capture(&inv, &log).await.unwrap();
        assert_eq!(outcome.exit_code, Some(3));
        assert!(outcome.exited_abnormally());
    }

    #[tokio::test]
    async fn test_time_box_sends_sigint_and_waits() {
        let dir = tempfile::tempdir().unwrap();
        let script = "trap 'echo interrupted; exit 0' INT\necho running\nwhile :; do sleep 0.05; done\n";
        let inv = invocation(
            dir.path(),
            script,
            CancelMode::InterruptAfter(Duration::from_millis(300)),
        );
        let log = dir.path().join("probe.log");

        let outcome = TeeCapture::new(false).capture(&inv, &log).await.unwrap();

        assert!(outcome.interrupted);
        assert_eq!(outcome.exit_code, Some(0));
        let text = std::fs::read_to_string(&log).unwrap();
        assert!(text.contains("running"));
        assert!(text.contains("interrupted"));
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_no_log() {
        let dir = tempfile::tempdir().unwrap();
        let inv = ProbeInvocation {
            name: "ghost".to_string(),
            program: dir.path().join("does-not-exist"),
            args: vec![],
            working_dir: dir.path().to_path_buf(),
            cancel: CancelMode::None,
        };
        let log = dir.path().join("ghost.log");

        let err = TeeCapture::new(false).capture(&inv, &log).await.unwrap_err();
        assert!(matches!(err, CaptureError::SpawnFailed(_)));
        assert!(!log.exists());
    }

    #[tokio::test]
    async fn test_signal_exit_maps_to_128_plus() {
        let dir = tempfile::tempdir().unwrap();
        let inv = invocation(dir.path(), "kill -TERM $$\n", CancelMode::None);
        let log = dir.path().join("probe.log");

        let outcome = TeeCapture::new(false).capture(&inv, &log).await.unwrap();
        assert_eq!(outcome.exit_code, Some(128 + 15));
    }

    #[tokio::test]
    async fn test_console_echo_matches_log_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("probe.sh");
        std::fs::write(
            &script,
            "for i in 1 2 3; do\n  echo \"out $i\"\n  sleep 0.02\n  echo \"err $i\" >&2\n  sleep 0.02\ndone\n",
        )
        .unwrap();
        let mut command = Command::new("/bin/sh");
        command.arg(&script);
        let log = dir.path().join("probe.log");
        let sink = SharedSink::default();
        let echo = Echo {
            stdout: sink.clone(),
            stderr: sink.clone(),
        };

        let run = tee_process_to(command, &log, Some(echo), None).await.unwrap();

        let logged = std::fs::read(&log).unwrap();
        assert_eq!(*sink.0.lock().unwrap(), logged);
        assert_eq!(run.bytes, logged.len() as u64);
        let text = String::from_utf8(logged).unwrap();
        assert!(text.contains("out 3\n"));
        assert!(text.contains("err 3\n"));
    }

    #[tokio::test]
    async fn test_background_leftover_is_terminated_after_exit() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("bg.pid");
        let script = format!(
            "sleep 30 &\necho $! > '{}'\necho done\nexit 0\n",
            pid_file.display()
        );
        let inv = invocation(dir.path(), &script, CancelMode::None);
        let log = dir.path().join("probe.log");

        let outcome = TeeCapture::new(false).capture(&inv, &log).await.unwrap();

        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.duration_ms < 10_000, "waited {}ms", outcome.duration_ms);
        assert!(std::fs::read_to_string(&log).unwrap().contains("done"));
        assert!(process_gone(read_pid(&pid_file)).await);
    }

    #[tokio::test]
    async fn test_leftover_ignoring_sigterm_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("bg.pid");
        let script = format!(
            "(trap '' TERM; sleep 30) &\necho $! > '{}'\necho done\nexit 0\n",
            pid_file.display()
        );
        let inv = invocation(dir.path(), &script, CancelMode::None);
        let log = dir.path().join("probe.log");

        let outcome = TeeCapture::new(false).capture(&inv, &log).await.unwrap();

        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.duration_ms < 10_000, "waited {}ms", outcome.duration_ms);
        assert!(process_gone(read_pid(&pid_file)).await);
    }
}
