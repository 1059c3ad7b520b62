// Probe Catalogue - the fixed validation sequence and run artifact names

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::probe::{BuildRecipe, CancelMode, ProbeCategory, ProbeSpec, Provisioning};
use super::run_context::RunContext;

/// Kernel monitor log (also the kernel check name's log)
pub const KERNEL_LOG_FILE: &str = "kernel_monitor.log";

/// Kernel check name
pub const KERNEL_CHECK_NAME: &str = "kernel_log";

/// Host/GPU snapshot written before the monitor starts
pub const SNAPSHOT_FILE: &str = "system_snapshot.txt";

/// Human-readable report artifact
pub const SUMMARY_TEXT_FILE: &str = "summary.txt";

/// Machine-readable mirror of the report
pub const SUMMARY_JSON_FILE: &str = "summary.json";

/// Build log name for an on-demand built probe
pub fn build_log_file(home_dir: &Path) -> String {
    let stem = home_dir
        .file_name()
        .map(|n| n.to_string_lossy().replace(['-', '.'], "_"))
        .unwrap_or_else(|| "probe".to_string());
    format!("{}_build.log", stem)
}

const BANDWIDTH_HOME: &str = "cuda-samples";
const BANDWIDTH_SOURCE: &str = "cuda-samples/Samples/1_Utilities/bandwidthTest";
const BANDWIDTH_BIN: &str = "cuda-samples/Samples/1_Utilities/bandwidthTest/bandwidthTest";
const BURN_HOME: &str = "gpu-burn";
const BURN_BIN: &str = "gpu-burn/gpu_burn";
const MEMTEST_HOME: &str = "cuda_memtest";
const MEMTEST_BIN: &str = "cuda_memtest/build/cuda_memtest";
const VULKAN_HOME: &str = "memtest_vulkan";
const VULKAN_BIN: &str = "memtest_vulkan/memtest_vulkan";

/// Ordered probe sequence for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbePlan {
    probes: Vec<ProbeSpec>,
}

impl ProbePlan {
    pub fn new(probes: Vec<ProbeSpec>) -> Self {
        Self { probes }
    }

    /// Bandwidth (cold) -> burn-in -> bandwidth (hot) -> VRAM correctness -> cross-API VRAM
    ///
    /// Each bandwidth pass is two invocations (pinned and pageable host memory);
    /// the hot pass repeats the cold one after the burn-in's thermal load.
    pub fn standard(ctx: &RunContext) -> Self {
        let durations = ctx.durations();

        let correctness_cancel = match durations.correctness_timeout {
            Some(limit) => CancelMode::InterruptAfter(limit),
            None => CancelMode::None,
        };

        Self::new(vec![
            bandwidth("bandwidth_cold_pinned", "pinned"),
            bandwidth("bandwidth_cold_pageable", "pageable"),
            ProbeSpec {
                name: "burn_in".to_string(),
                category: ProbeCategory::BurnIn,
                home_dir: PathBuf::from(BURN_HOME),
                executable: PathBuf::from(BURN_BIN),
                args: vec!["-i".into(), "{device}".into(), "{burn_secs}".into()],
                expected_duration: Some(durations.burn_in),
                cancel: CancelMode::None,
                provisioning: Provisioning::Buildable(BuildRecipe {
                    working_dir: PathBuf::from(BURN_HOME),
                    command: vec!["make".into(), "COMPUTE={compute}".into()],
                    needs_compute_capability: true,
                }),
                log_file: "burn_in.log".to_string(),
            },
            bandwidth("bandwidth_hot_pinned", "pinned"),
            bandwidth("bandwidth_hot_pageable", "pageable"),
            ProbeSpec {
                name: "vram_correctness".to_string(),
                category: ProbeCategory::VramCorrectness,
                home_dir: PathBuf::from(MEMTEST_HOME),
                executable: PathBuf::from(MEMTEST_BIN),
                args: vec!["--device".into(), "{device}".into()],
                expected_duration: durations.correctness_timeout,
                cancel: correctness_cancel,
                provisioning: Provisioning::Buildable(BuildRecipe {
                    working_dir: PathBuf::from(MEMTEST_HOME),
                    command: vec!["make".into(), "-C".into(), "build".into()],
                    needs_compute_capability: false,
                }),
                log_file: "vram_correctness.log".to_string(),
            },
            ProbeSpec {
                name: "cross_api_vram".to_string(),
                category: ProbeCategory::CrossApiVram,
                home_dir: PathBuf::from(VULKAN_HOME),
                executable: PathBuf::from(VULKAN_BIN),
                args: vec!["{device}".into()],
                expected_duration: Some(durations.cross_api),
                cancel: CancelMode::InterruptAfter(durations.cross_api),
                provisioning: Provisioning::Required,
                log_file: "cross_api_vram.log".to_string(),
            },
        ])
    }

    pub fn probes(&self) -> &[ProbeSpec] {
        &self.probes
    }

    /// Distinct probe home directories, in first-use order
    pub fn home_dirs(&self) -> Vec<&Path> {
        let mut dirs: Vec<&Path> = Vec::new();
        for probe in &self.probes {
            if !dirs.contains(&probe.home_dir.as_path()) {
                dirs.push(probe.home_dir.as_path());
            }
        }
        dirs
    }

    /// Probes that share an executable are ensured once
    pub fn distinct_binaries(&self) -> Vec<&ProbeSpec> {
        let mut seen: Vec<&Path> = Vec::new();
        let mut out = Vec::new();
        for probe in &self.probes {
            if !seen.contains(&probe.executable.as_path()) {
                seen.push(probe.executable.as_path());
                out.push(probe);
            }
        }
        out
    }
}

fn bandwidth(name: &str, memory: &str) -> ProbeSpec {
    ProbeSpec {
        name: name.to_string(),
        category: ProbeCategory::Bandwidth,
        home_dir: PathBuf::from(BANDWIDTH_HOME),
        executable: PathBuf::from(BANDWIDTH_BIN),
        args: vec!["--device={device}".into(), format!("--memory={}", memory)],
        expected_duration: Some(Duration::from_secs(30)),
        cancel: CancelMode::None,
        provisioning: Provisioning::Buildable(BuildRecipe {
            working_dir: PathBuf::from(BANDWIDTH_SOURCE),
            command: vec!["make".into()],
            needs_compute_capability: false,
        }),
        log_file: format!("{}.log", name),
    }
}
