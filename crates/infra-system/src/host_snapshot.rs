// Host/GPU system snapshot
// reason: sysinfo for host facts, nvidia-smi for the device report
use async_trait::async_trait;
use std::fmt::Write as _;
use sysinfo::System;
use tracing::warn;

use gpuval_core::port::system_snapshot::SystemSnapshot;

use crate::nvidia_smi::NvidiaSmiQuery;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Host facts gathered through sysinfo
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostFacts {
    pub host_name: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub cpu_brand: Option<String>,
    pub logical_cpus: usize,
    pub physical_cores: Option<usize>,
    pub total_memory_bytes: u64,
}

impl HostFacts {
    /// Read facts from the running host (blocking)
    pub fn gather() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();

        Self {
            host_name: System::host_name(),
            os_name: System::name(),
            os_version: System::os_version(),
            kernel_version: System::kernel_version(),
            cpu_brand: system.cpus().first().map(|c| c.brand().trim().to_string()),
            logical_cpus: system.cpus().len(),
            physical_cores: system.physical_core_count(),
            total_memory_bytes: system.total_memory(),
        }
    }

    pub fn render(&self) -> String {
        let unknown = || "unknown".to_string();
        let mut out = String::new();
        let _ = writeln!(out, "host:        {}", self.host_name.clone().unwrap_or_else(unknown));
        let _ = writeln!(
            out,
            "os:          {} {}",
            self.os_name.clone().unwrap_or_else(unknown),
            self.os_version.clone().unwrap_or_default()
        );
        let _ = writeln!(out, "kernel:      {}", self.kernel_version.clone().unwrap_or_else(unknown));
        let _ = writeln!(out, "cpu:         {}", self.cpu_brand.clone().unwrap_or_else(unknown));
        let _ = writeln!(
            out,
            "cpu cores:   {} logical / {} physical",
            self.logical_cpus,
            self.physical_cores.map_or_else(unknown, |n| n.to_string())
        );
        let _ = writeln!(
            out,
            "memory:      {:.1} GiB",
            self.total_memory_bytes as f64 / GIB
        );
        out
    }
}

/// System Snapshot combining host facts and the nvidia-smi device report
pub struct HostSnapshot {
    smi: NvidiaSmiQuery,
}

impl HostSnapshot {
    pub fn new(smi: NvidiaSmiQuery) -> Self {
        Self { smi }
    }
}

impl Default for HostSnapshot {
    fn default() -> Self {
        Self::new(NvidiaSmiQuery::new())
    }
}

#[async_trait]
impl SystemSnapshot for HostSnapshot {
    async fn collect(&self, device_index: u32) -> String {
        let facts = match tokio::task::spawn_blocking(HostFacts::gather).await {
            Ok(facts) => facts,
            Err(e) => {
                warn!(error = %e, "Host facts unavailable");
                HostFacts::default()
            }
        };

        let mut out = String::from("== host ==\n");
        out.push_str(&facts.render());
        let _ = writeln!(out, "\n== nvidia-smi -q -i {} ==", device_index);
        match self.smi.full_report(device_index).await {
            Ok(report) => out.push_str(&report),
            Err(e) => {
                warn!(device = device_index, error = %e, "GPU report unavailable for snapshot");
                let _ = writeln!(out, "unavailable: {}", e);
            }
        }
        out
    }
}
