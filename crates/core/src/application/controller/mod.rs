// Run Controller - sequences probes and drives classification/reporting

mod error;
mod monitor_guard;
mod shutdown;
mod state;

pub use error::RunError;
pub use monitor_guard::MonitorGuard;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
pub use state::{RunState, StateTracker};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::application::classifier::Classifier;
use crate::application::reporter::{write_outcomes, SummaryReporter};
use crate::domain::catalogue::{build_log_file, KERNEL_LOG_FILE, SNAPSHOT_FILE};
use crate::domain::{
    ProbeOutcome, ProbePlan, Provisioning, RunContext, RunHeader, Summary, TemplateVars,
};
use crate::port::{CaptureError, GpuQuery, KernelMonitor, ProbeBuilder, ProcessCapture, SystemSnapshot};

/// Everything a completed run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: Summary,
    pub outcomes: Vec<ProbeOutcome>,
    pub run_dir: PathBuf,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.summary.exit_code()
    }
}

/// Run Controller
///
/// INIT -> VALIDATE_CONTEXT -> START_MONITOR -> ENSURE_BINARIES -> RUN_PROBES
/// -> CLASSIFY -> REPORT -> COMPLETE, with ABORTED reachable from any
/// non-terminal state. Probes run strictly one at a time. A controller
/// drives a single run.
pub struct RunController {
    capture: Arc<dyn ProcessCapture>,
    monitor: Arc<dyn KernelMonitor>,
    builder: Arc<dyn ProbeBuilder>,
    gpu_query: Arc<dyn GpuQuery>,
    snapshot: Arc<dyn SystemSnapshot>,
    classifier: Classifier,
    state: StateTracker,
}

impl RunController {
    pub fn new(
        capture: Arc<dyn ProcessCapture>,
        monitor: Arc<dyn KernelMonitor>,
        builder: Arc<dyn ProbeBuilder>,
        gpu_query: Arc<dyn GpuQuery>,
        snapshot: Arc<dyn SystemSnapshot>,
        classifier: Classifier,
    ) -> Self {
        Self {
            capture,
            monitor,
            builder,
            gpu_query,
            snapshot,
            classifier,
            state: StateTracker::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state.current()
    }

    /// Execute one full run
    ///
    /// # Errors
    /// - RunError::Configuration for an invalid context (no artifacts created)
    /// - RunError::MissingDependency when a binary is absent and cannot be built
    /// - RunError::Interrupted when `shutdown` fires before classification
    /// - RunError::Artifact when the run directory or report cannot be written
    pub async fn run(
        &self,
        ctx: &RunContext,
        plan: &ProbePlan,
        mut shutdown: ShutdownToken,
    ) -> Result<RunReport, RunError> {
        self.state.enter(RunState::ValidateContext);
        if let Err(e) = validate_context(ctx, plan) {
            error!(error = %e, "Run context rejected");
            return Err(self.abort(e));
        }

        let run_dir = ctx.run_dir();
        if let Err(e) = std::fs::create_dir_all(&run_dir) {
            return Err(self.abort(RunError::Artifact(format!(
                "cannot create run directory {}: {}",
                run_dir.display(),
                e
            ))));
        }
        info!(run_id = %ctx.run_id(), device = ctx.device_index(), run_dir = %run_dir.display(), "Run started");

        self.state.enter(RunState::StartMonitor);
        self.write_snapshot(ctx, &run_dir).await;
        let guard = MonitorGuard::acquire(self.monitor.as_ref(), &run_dir.join(KERNEL_LOG_FILE)).await;

        let probe_phase = tokio::select! {
            result = self.ensure_and_run(ctx, plan, &run_dir) => result,
            _ = shutdown.wait() => {
                warn!(state = %self.state.current(), "Run interrupted externally");
                Err(RunError::Interrupted(self.state.current()))
            }
        };

        // Released on every exit path from RUN_PROBES, before any summary exists
        guard.release().await;

        let outcomes = match probe_phase {
            Ok(outcomes) => outcomes,
            Err(e) => {
                error!(error = %e, "Run aborted");
                return Err(self.abort(e));
            }
        };

        if let Err(e) = write_outcomes(&outcomes, &run_dir) {
            warn!(error = %e, "Could not record probe outcomes");
        }

        self.state.enter(RunState::Classify);
        let checks = self.classifier.classify_run(plan, &run_dir, &outcomes);

        self.state.enter(RunState::Report);
        let summary = Summary::finalize(RunHeader::from_context(ctx), checks);
        if let Err(e) = SummaryReporter::write(&summary, &run_dir) {
            return Err(self.abort(e.into()));
        }

        self.state.enter(RunState::Complete);
        info!(overall = %summary.overall, fail_count = summary.fail_count, "Run complete");

        Ok(RunReport {
            summary,
            outcomes,
            run_dir,
        })
    }

    fn abort(&self, err: RunError) -> RunError {
        self.state.enter(RunState::Aborted);
        err
    }

    async fn write_snapshot(&self, ctx: &RunContext, run_dir: &Path) {
        let text = self.snapshot.collect(ctx.device_index()).await;
        if let Err(e) = std::fs::write(run_dir.join(SNAPSHOT_FILE), text) {
            warn!(error = %e, "Could not write system snapshot");
        }
    }

    async fn ensure_and_run(
        &self,
        ctx: &RunContext,
        plan: &ProbePlan,
        run_dir: &Path,
    ) -> Result<Vec<ProbeOutcome>, RunError> {
        self.state.enter(RunState::EnsureBinaries);
        let vars = self.ensure_binaries(ctx, plan, run_dir).await?;

        self.state.enter(RunState::RunProbes);
        Ok(self.run_probes(ctx, plan, run_dir, &vars).await)
    }

    /// Build missing on-demand probes; a missing required probe is fatal
    async fn ensure_binaries(
        &self,
        ctx: &RunContext,
        plan: &ProbePlan,
        run_dir: &Path,
    ) -> Result<TemplateVars, RunError> {
        let root = ctx.install_root();
        let mut vars = TemplateVars::from_context(ctx);
        let mut compute_known = false;

        for probe in plan.distinct_binaries() {
            let exe = probe.executable_path(root);
            if exe.is_file() {
                debug!(probe = %probe.name, path = %exe.display(), "Probe binary present");
                continue;
            }

            let recipe = match &probe.provisioning {
                Provisioning::Required => {
                    return Err(RunError::MissingDependency(format!(
                        "required probe '{}' not found at {}",
                        probe.name,
                        exe.display()
                    )));
                }
                Provisioning::Buildable(recipe) => recipe,
            };

            if recipe.needs_compute_capability && !compute_known {
                let capability = self
                    .gpu_query
                    .compute_capability(ctx.device_index())
                    .await
                    .map_err(|e| {
                        RunError::MissingDependency(format!(
                            "cannot build '{}': compute capability query failed: {}",
                            probe.name, e
                        ))
                    })?;
                info!(device = ctx.device_index(), compute_capability = %capability, "Compute capability resolved");
                vars = vars.with_compute(capability);
                compute_known = true;
            }

            let command: Vec<String> = recipe.command.iter().map(|c| vars.render(c)).collect();
            let log_path = run_dir.join(build_log_file(&probe.home_dir));
            info!(probe = %probe.name, command = %command.join(" "), "Building probe");

            self.builder
                .build(&probe.name, &root.join(&recipe.working_dir), &command, &log_path)
                .await
                .map_err(|e| {
                    RunError::MissingDependency(format!("build of '{}' failed: {}", probe.name, e))
                })?;

            if !exe.is_file() {
                return Err(RunError::MissingDependency(format!(
                    "build of '{}' finished but {} is still missing",
                    probe.name,
                    exe.display()
                )));
            }
        }

        Ok(vars)
    }

    /// Run every probe in order; failures are recorded, never fatal
    async fn run_probes(
        &self,
        ctx: &RunContext,
        plan: &ProbePlan,
        run_dir: &Path,
        vars: &TemplateVars,
    ) -> Vec<ProbeOutcome> {
        let mut outcomes = Vec::with_capacity(plan.probes().len());

        for probe in plan.probes() {
            let invocation = probe.invocation(ctx, vars);
            let log_path = run_dir.join(&probe.log_file);

            info!(
                probe = %probe.name,
                command = %invocation.command_line(),
                cancel = %invocation.cancel,
                "Starting probe"
            );

            let outcome = match self.capture.capture(&invocation, &log_path).await {
                Ok(outcome) => {
                    if outcome.exited_abnormally() {
                        warn!(probe = %probe.name, exit_code = ?outcome.exit_code, "Probe exited non-zero, continuing");
                    } else {
                        info!(
                            probe = %probe.name,
                            exit_code = ?outcome.exit_code,
                            interrupted = outcome.interrupted,
                            duration_ms = outcome.duration_ms,
                            "Probe finished"
                        );
                    }
                    outcome
                }
                Err(CaptureError::SpawnFailed(reason)) => {
                    error!(probe = %probe.name, error = %reason, "Probe failed to start, continuing");
                    ProbeOutcome::not_started(&probe.name, log_path, reason)
                }
                Err(e) => {
                    error!(probe = %probe.name, error = %e, "Probe capture failed, continuing");
                    ProbeOutcome::not_started(&probe.name, log_path, e.to_string())
                }
            };
            outcomes.push(outcome);
        }

        outcomes
    }
}

/// VALIDATE_CONTEXT: installation root must hold every probe's home directory
fn validate_context(ctx: &RunContext, plan: &ProbePlan) -> Result<(), RunError> {
    let root = ctx.install_root();
    if !root.is_dir() {
        return Err(RunError::Configuration(format!(
            "installation root {} is not a directory",
            root.display()
        )));
    }

    let missing: Vec<String> = plan
        .home_dirs()
        .into_iter()
        .filter(|dir| !root.join(dir).is_dir())
        .map(|dir| dir.display().to_string())
        .collect();
    if !missing.is_empty() {
        return Err(RunError::Configuration(format!(
            "installation root {} lacks probe directories: {}",
            root.display(),
            missing.join(", ")
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{exit_code, OverallVerdict, ProbeDurations, Verdict};
    use crate::port::gpu_query::mocks::MockGpuQuery;
    use crate::port::kernel_monitor::mocks::MockKernelMonitor;
    use crate::port::probe_builder::mocks::MockProbeBuilder;
    use crate::port::process_capture::mocks::{MockProcessCapture, MockRun};
    use crate::port::system_snapshot::mocks::MockSystemSnapshot;
    use chrono::Utc;
    use std::time::Duration;

    const BW_PASS: &str = "Device 0: NVIDIA RTX A6000\nResult = PASS\n";
    const BURN_OK: &str = "Tested 1 GPUs:\n\tGPU 0: OK\n";

    struct Fixture {
        _root: tempfile::TempDir,
        ctx: RunContext,
        plan: ProbePlan,
    }

    /// Installation root with every probe home; `with_binaries` also creates the executables
    fn fixture(with_binaries: bool) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(
            "unit run",
            0,
            ProbeDurations::from_secs(60, 30, 0).unwrap(),
            root.path(),
            None,
            Utc::now(),
        )
        .unwrap();
        let plan = ProbePlan::standard(&ctx);

        for dir in plan.home_dirs() {
            std::fs::create_dir_all(root.path().join(dir)).unwrap();
        }
        if with_binaries {
            for probe in plan.probes() {
                let exe = probe.executable_path(root.path());
                std::fs::create_dir_all(exe.parent().unwrap()).unwrap();
                std::fs::write(exe, b"#!/bin/sh\n").unwrap();
            }
        }

        Fixture {
            _root: root,
            ctx,
            plan,
        }
    }

    fn passing_capture() -> MockProcessCapture {
        MockProcessCapture::new()
            .with_output("bandwidth_cold_pinned", BW_PASS, 0)
            .with_output("bandwidth_cold_pageable", BW_PASS, 0)
            .with_output("burn_in", BURN_OK, 0)
            .with_output("bandwidth_hot_pinned", BW_PASS, 0)
            .with_output("bandwidth_hot_pageable", BW_PASS, 0)
            .with_output("vram_correctness", "Test 10 passed\n", 0)
            .with_output("cross_api_vram", "memtest_vulkan: no any errors, testing PASSed.\n", 0)
    }

    fn controller(
        capture: Arc<MockProcessCapture>,
        monitor: Arc<MockKernelMonitor>,
        builder: Arc<MockProbeBuilder>,
    ) -> RunController {
        RunController::new(
            capture,
            monitor,
            builder,
            Arc::new(MockGpuQuery::new(8, 6)),
            Arc::new(MockSystemSnapshot),
            Classifier::standard().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_clean_run_passes_in_order() {
        let fx = fixture(true);
        let capture = Arc::new(passing_capture());
        let monitor = Arc::new(MockKernelMonitor::new(&[]));
        let ctl = controller(
            capture.clone(),
            monitor.clone(),
            Arc::new(MockProbeBuilder::producing(vec![])),
        );
        let (_tx, token) = shutdown_channel();

        let report = ctl.run(&fx.ctx, &fx.plan, token).await.unwrap();

        assert_eq!(report.summary.overall, OverallVerdict::Pass);
        assert_eq!(report.exit_code(), exit_code::PASS);
        assert_eq!(report.summary.checks.len(), 8);
        assert_eq!(report.summary.checks[0].name, "kernel_log");
        assert_eq!(
            capture.calls(),
            fx.plan.probes().iter().map(|p| p.name.clone()).collect::<Vec<_>>()
        );
        assert_eq!(ctl.state(), RunState::Complete);
        assert!(!monitor.is_running());
        assert!(report.run_dir.join("summary.txt").is_file());
        assert!(report.run_dir.join("outcomes.json").is_file());
        assert!(report.run_dir.join(SNAPSHOT_FILE).is_file());
    }

    #[tokio::test]
    async fn test_kernel_fault_fails_run_with_evidence() {
        let fx = fixture(true);
        let line = "NVRM: Xid (PCI:0000:01:00): 79, pid=0, GPU has fallen off the bus.";
        let monitor = Arc::new(MockKernelMonitor::new(&["usb 1-1: reset", line]));
        let ctl = controller(
            Arc::new(passing_capture()),
            monitor,
            Arc::new(MockProbeBuilder::producing(vec![])),
        );
        let (_tx, token) = shutdown_channel();

        let report = ctl.run(&fx.ctx, &fx.plan, token).await.unwrap();

        assert_eq!(report.summary.overall, OverallVerdict::Fail);
        assert_eq!(report.exit_code(), exit_code::FAIL);
        let kernel = &report.summary.checks[0];
        assert_eq!(kernel.verdict, Verdict::Fail);
        assert_eq!(kernel.evidence, vec![line.to_string()]);
    }

    #[tokio::test]
    async fn test_non_zero_exit_does_not_stop_sequence() {
        let fx = fixture(true);
        let capture = Arc::new(
            passing_capture()
                .with_output("burn_in", "GPU 0: FAULTY\n", 1)
                .with("vram_correctness", MockRun::SpawnFail("exec format error".to_string())),
        );
        let ctl = controller(
            capture.clone(),
            Arc::new(MockKernelMonitor::new(&[])),
            Arc::new(MockProbeBuilder::producing(vec![])),
        );
        let (_tx, token) = shutdown_channel();

        let report = ctl.run(&fx.ctx, &fx.plan, token).await.unwrap();

        assert_eq!(capture.calls().len(), 7);
        let verdicts: Vec<Verdict> = report.summary.checks.iter().map(|c| c.verdict).collect();
        assert_eq!(verdicts[3], Verdict::Fail); // burn_in
        assert_eq!(verdicts[6], Verdict::Warn); // vram_correctness never started
        assert_eq!(report.summary.fail_count, 1);
        assert_eq!(report.outcomes.len(), 7);
    }

    #[tokio::test]
    async fn test_missing_required_binary_aborts_and_releases_monitor() {
        let fx = fixture(true);
        std::fs::remove_file(fx.plan.probes()[6].executable_path(fx.ctx.install_root())).unwrap();

        let capture = Arc::new(passing_capture());
        let monitor = Arc::new(MockKernelMonitor::new(&[]));
        let ctl = controller(
            capture.clone(),
            monitor.clone(),
            Arc::new(MockProbeBuilder::producing(vec![])),
        );
        let (_tx, token) = shutdown_channel();

        let err = ctl.run(&fx.ctx, &fx.plan, token).await.unwrap_err();

        assert!(matches!(err, RunError::MissingDependency(_)));
        assert_eq!(err.exit_code(), exit_code::FATAL);
        assert_eq!(monitor.start_count(), 1);
        assert!(!monitor.is_running());
        assert!(capture.calls().is_empty());
        assert_eq!(ctl.state(), RunState::Aborted);
        assert!(!fx.ctx.run_dir().join("summary.txt").exists());
    }

    #[tokio::test]
    async fn test_buildable_probe_is_built_with_compute_capability() {
        let fx = fixture(true);
        let burn = &fx.plan.probes()[2];
        let burn_exe = burn.executable_path(fx.ctx.install_root());
        std::fs::remove_file(&burn_exe).unwrap();

        let builder = Arc::new(MockProbeBuilder::producing(vec![burn_exe.clone()]));
        let ctl = controller(
            Arc::new(passing_capture()),
            Arc::new(MockKernelMonitor::new(&[])),
            builder.clone(),
        );
        let (_tx, token) = shutdown_channel();

        let report = ctl.run(&fx.ctx, &fx.plan, token).await.unwrap();

        assert_eq!(builder.commands(), vec![vec!["make".to_string(), "COMPUTE=86".to_string()]]);
        assert!(report.run_dir.join("gpu_burn_build.log").is_file());
        assert_eq!(report.summary.overall, OverallVerdict::Pass);
    }

    #[tokio::test]
    async fn test_failed_build_is_fatal() {
        let fx = fixture(true);
        std::fs::remove_file(fx.plan.probes()[0].executable_path(fx.ctx.install_root())).unwrap();

        let monitor = Arc::new(MockKernelMonitor::new(&[]));
        let ctl = controller(
            Arc::new(passing_capture()),
            monitor.clone(),
            Arc::new(MockProbeBuilder::failing()),
        );
        let (_tx, token) = shutdown_channel();

        let err = ctl.run(&fx.ctx, &fx.plan, token).await.unwrap_err();
        assert!(matches!(err, RunError::MissingDependency(_)));
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn test_unknown_compute_capability_is_fatal() {
        let fx = fixture(true);
        std::fs::remove_file(fx.plan.probes()[2].executable_path(fx.ctx.install_root())).unwrap();

        let monitor = Arc::new(MockKernelMonitor::new(&[]));
        let builder = Arc::new(MockProbeBuilder::producing(vec![]));
        let ctl = RunController::new(
            Arc::new(passing_capture()),
            monitor.clone(),
            builder.clone(),
            Arc::new(MockGpuQuery::unavailable()),
            Arc::new(MockSystemSnapshot),
            Classifier::standard().unwrap(),
        );
        let (_tx, token) = shutdown_channel();

        let err = ctl.run(&fx.ctx, &fx.plan, token).await.unwrap_err();

        assert!(matches!(err, RunError::MissingDependency(ref m) if m.contains("compute capability")));
        assert!(builder.commands().is_empty());
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn test_invalid_layout_aborts_before_artifacts() {
        let fx = fixture(false);
        std::fs::remove_dir_all(fx.ctx.install_root().join("gpu-burn")).unwrap();

        let monitor = Arc::new(MockKernelMonitor::new(&[]));
        let ctl = controller(
            Arc::new(passing_capture()),
            monitor.clone(),
            Arc::new(MockProbeBuilder::producing(vec![])),
        );
        let (_tx, token) = shutdown_channel();

        let err = ctl.run(&fx.ctx, &fx.plan, token).await.unwrap_err();
        assert!(matches!(err, RunError::Configuration(_)));
        assert_eq!(monitor.start_count(), 0);
        assert!(!fx.ctx.run_dir().exists());
    }

    #[tokio::test]
    async fn test_external_interruption_releases_monitor() {
        let fx = fixture(true);
        let monitor = Arc::new(MockKernelMonitor::new(&[]));
        let capture = Arc::new(passing_capture().with("burn_in", MockRun::Hang));
        let ctl = controller(
            capture.clone(),
            monitor.clone(),
            Arc::new(MockProbeBuilder::producing(vec![])),
        );
        let (tx, token) = shutdown_channel();

        let interrupter = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.shutdown();
        };
        let (result, ()) = tokio::join!(ctl.run(&fx.ctx, &fx.plan, token), interrupter);

        let err = result.unwrap_err();
        assert!(matches!(err, RunError::Interrupted(RunState::RunProbes)));
        assert_eq!(err.exit_code(), exit_code::INTERRUPTED);
        assert!(!monitor.is_running());
        assert_eq!(ctl.state(), RunState::Aborted);
    }

    #[tokio::test]
    async fn test_monitor_unavailable_yields_warn() {
        let fx = fixture(true);
        let ctl = controller(
            Arc::new(passing_capture()),
            Arc::new(MockKernelMonitor::failing()),
            Arc::new(MockProbeBuilder::producing(vec![])),
        );
        let (_tx, token) = shutdown_channel();

        let report = ctl.run(&fx.ctx, &fx.plan, token).await.unwrap();
        assert_eq!(report.summary.checks[0].verdict, Verdict::Warn);
        assert_eq!(report.summary.overall, OverallVerdict::Pass);
    }
}
