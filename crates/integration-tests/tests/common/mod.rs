//! Shared fixtures: a fake installation root whose probe binaries are small
//! sh scripts, and a fake kernel-message source.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use gpuval_core::application::{Classifier, RunController};
use gpuval_core::domain::{ProbeDurations, ProbePlan, RunContext};
use gpuval_infra_system::{DmesgMonitor, HostSnapshot, MakeBuilder, NvidiaSmiQuery, TeeCapture};
use tempfile::TempDir;

/// Script-writing tests and process-spawning tests must not overlap, or an
/// exec can hit ETXTBSY on a script another thread's fork still holds open.
pub static SERIAL: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

pub const BANDWIDTH: &str = "cuda-samples/Samples/1_Utilities/bandwidthTest/bandwidthTest";
pub const BURN: &str = "gpu-burn/gpu_burn";
pub const MEMTEST: &str = "cuda_memtest/build/cuda_memtest";
pub const VULKAN: &str = "memtest_vulkan/memtest_vulkan";

pub const BANDWIDTH_PASS: &str = r#"echo "[CUDA Bandwidth Test] - Starting..."
echo " Device 0: Fake GPU"
echo " Host to Device Bandwidth, 1 Device(s)"
echo "   32000000                     24.5"
echo "Result = PASS""#;

pub const BURN_OK: &str = r#"echo "Burning for $3 seconds."
echo "100.0%  proc'd: 1200 (9000 Gflop/s)   errors: 0   temps: 71 C"
echo "Tested 1 GPUs:"
echo "	GPU 0: OK""#;

pub const MEMTEST_OK: &str = r#"echo "[$(date)][fake][0]:Running cuda memtest, 0 iteration"
echo "[$(date)][fake][0]:Test10 [Memory stress test]"
echo "[$(date)][fake][0]:Test10 finished in 1.0 seconds""#;

/// Runs until SIGINT, then reports like memtest_vulkan does
pub const VULKAN_UNTIL_INT: &str = r#"trap 'echo "memtest_vulkan: no any errors, testing PASSed."; exit 0' INT
echo "Testing device $1"
while :; do sleep 0.05; done"#;

pub struct FakeInstall {
    pub root: TempDir,
}

impl FakeInstall {
    /// Layout with every probe present and healthy
    pub fn healthy() -> Self {
        let root = tempfile::tempdir().unwrap();
        let install = Self { root };
        for dir in ["cuda-samples", "gpu-burn", "cuda_memtest", "memtest_vulkan"] {
            std::fs::create_dir_all(install.path().join(dir)).unwrap();
        }
        install.script(BANDWIDTH, BANDWIDTH_PASS);
        install.script(BURN, BURN_OK);
        install.script(MEMTEST, MEMTEST_OK);
        install.script(VULKAN, VULKAN_UNTIL_INT);
        install
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Write an executable sh script at `rel`
    pub fn script(&self, rel: &str, body: &str) -> PathBuf {
        let path = self.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Fake kernel-message source: prints `lines`, records its pid, then idles
    pub fn kernel_source(&self, lines: &[&str]) -> (DmesgMonitor, PathBuf) {
        let pid_file = self.path().join("fake_dmesg.pid");
        let mut body = String::new();
        for line in lines {
            body.push_str(&format!("printf '%s\\n' '{}'\n", line));
        }
        body.push_str(&format!("echo $$ > '{}'\nexec sleep 60\n", pid_file.display()));

        let script = self.path().join("fake_dmesg.sh");
        std::fs::write(&script, body).unwrap();
        (
            DmesgMonitor::with_command("/bin/sh", vec![script.display().to_string()]),
            pid_file,
        )
    }

    pub fn context(&self, cross_api_secs: u64) -> RunContext {
        RunContext::new(
            "integration rig",
            0,
            ProbeDurations::from_secs(5, cross_api_secs, 0).unwrap(),
            self.path(),
            None,
            Utc::now(),
        )
        .unwrap()
    }
}

pub fn controller(monitor: DmesgMonitor, absent_tool_dir: &Path) -> RunController {
    let smi = absent_tool_dir.join("no-nvidia-smi");
    RunController::new(
        Arc::new(TeeCapture::new(false)),
        Arc::new(monitor),
        Arc::new(MakeBuilder::new(false)),
        Arc::new(NvidiaSmiQuery::with_program(&smi)),
        Arc::new(HostSnapshot::new(NvidiaSmiQuery::with_program(&smi))),
        Classifier::standard().unwrap(),
    )
}

pub fn plan(ctx: &RunContext) -> ProbePlan {
    ProbePlan::standard(ctx)
}

/// Whether a process with this pid still exists
pub fn process_alive(pid_file: &Path) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let pid: i32 = std::fs::read_to_string(pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    kill(Pid::from_raw(pid), None).is_ok()
}
