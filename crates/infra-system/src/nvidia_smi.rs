// nvidia-smi backed GPU query
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

use gpuval_core::domain::ComputeCapability;
use gpuval_core::port::gpu_query::{GpuQuery, QueryError};

/// GPU Query via `nvidia-smi --query-gpu=compute_cap`
pub struct NvidiaSmiQuery {
    program: PathBuf,
    /// Arguments placed before the query arguments (wrappers, test shims)
    leading_args: Vec<String>,
}

impl NvidiaSmiQuery {
    pub fn new() -> Self {
        Self::with_program("nvidia-smi")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self::with_command(program, Vec::new())
    }

    pub fn with_command(program: impl Into<PathBuf>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }

    /// Raw `nvidia-smi -q -i <device>` report, for the system snapshot
    pub async fn full_report(&self, device_index: u32) -> Result<String, QueryError> {
        let device = device_index.to_string();
        self.run(&["-q", "-i", &device]).await
    }

    async fn run(&self, args: &[&str]) -> Result<String, QueryError> {
        let output = Command::new(&self.program)
            .args(&self.leading_args)
            .args(args)
            .output()
            .await
            .map_err(|e| QueryError::ToolFailed(format!("{}: {}", self.program.display(), e)))?;

        if !output.status.success() {
            return Err(QueryError::ToolFailed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for NvidiaSmiQuery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GpuQuery for NvidiaSmiQuery {
    async fn compute_capability(&self, device_index: u32) -> Result<ComputeCapability, QueryError> {
        let device = device_index.to_string();
        let stdout = self
            .run(&["--query-gpu=compute_cap", "--format=csv,noheader", "-i", &device])
            .await?;
        debug!(device = device_index, raw = %stdout.trim(), "compute_cap query");

        let first = stdout.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        ComputeCapability::parse(first).map_err(|e| QueryError::Parse(e.to_string()))
    }
}
