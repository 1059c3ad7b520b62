// Probe Domain Model - external diagnostic tools and how to invoke them

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{DomainError, Result};
use super::run_context::RunContext;

/// Check category; selects the fault rule applied to a log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeCategory {
    Kernel,
    Bandwidth,
    BurnIn,
    VramCorrectness,
    CrossApiVram,
}

impl ProbeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeCategory::Kernel => "kernel",
            ProbeCategory::Bandwidth => "bandwidth",
            ProbeCategory::BurnIn => "burn_in",
            ProbeCategory::VramCorrectness => "vram_correctness",
            ProbeCategory::CrossApiVram => "cross_api_vram",
        }
    }
}

impl std::fmt::Display for ProbeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the orchestrator bounds a probe's run time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelMode {
    /// Runs to natural completion
    None,
    /// Receives a soft interrupt (SIGINT) once the duration elapses
    InterruptAfter(Duration),
}

impl std::fmt::Display for CancelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelMode::None => write!(f, "none"),
            CancelMode::InterruptAfter(d) => write!(f, "interrupt after {}s", d.as_secs()),
        }
    }
}

/// Build instructions for an on-demand probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecipe {
    /// Directory (relative to the installation root) the build runs in
    pub working_dir: PathBuf,
    /// Command template; first element is the program
    pub command: Vec<String>,
    /// Whether `{compute}` must be resolved through the GPU query port
    pub needs_compute_capability: bool,
}

/// Whether a missing binary is fatal or buildable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provisioning {
    Required,
    Buildable(BuildRecipe),
}

/// One step of the probe sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSpec {
    /// Check name; unique within a plan
    pub name: String,
    pub category: ProbeCategory,
    /// Probe home directory, relative to the installation root
    pub home_dir: PathBuf,
    /// Executable, relative to the installation root
    pub executable: PathBuf,
    /// Argument templates (see [`TemplateVars`])
    pub args: Vec<String>,
    /// Rough expected wall time (informational)
    pub expected_duration: Option<Duration>,
    pub cancel: CancelMode,
    pub provisioning: Provisioning,
    /// Log file name inside the run directory
    pub log_file: String,
}

impl ProbeSpec {
    pub fn is_required(&self) -> bool {
        matches!(self.provisioning, Provisioning::Required)
    }

    pub fn home_path(&self, install_root: &Path) -> PathBuf {
        install_root.join(&self.home_dir)
    }

    pub fn executable_path(&self, install_root: &Path) -> PathBuf {
        install_root.join(&self.executable)
    }

    /// Expected wall time for plan listings (`~300s`, or `open-ended`)
    pub fn expected_label(&self) -> String {
        match self.expected_duration {
            Some(d) => format!("~{}s", d.as_secs()),
            None => "open-ended".to_string(),
        }
    }

    /// Resolve the invocation for a run
    pub fn invocation(&self, ctx: &RunContext, vars: &TemplateVars) -> ProbeInvocation {
        ProbeInvocation {
            name: self.name.clone(),
            program: self.executable_path(ctx.install_root()),
            args: self.args.iter().map(|a| vars.render(a)).collect(),
            working_dir: self.home_path(ctx.install_root()),
            cancel: self.cancel,
        }
    }
}

/// Fully substituted command for Process Capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeInvocation {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub cancel: CancelMode,
}

impl ProbeInvocation {
    /// Shell-like rendering for logs and `plan` output
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// GPU compute capability (`major.minor`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeCapability {
    pub major: u32,
    pub minor: u32,
}

impl ComputeCapability {
    /// Parse `8.6` style output
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let invalid = || DomainError::InvalidComputeCapability(trimmed.to_string());

        let (major, minor) = trimmed.split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            major: major.trim().parse().map_err(|_| invalid())?,
            minor: minor.trim().parse().map_err(|_| invalid())?,
        })
    }

    /// Build flag form (`86` for 8.6)
    pub fn as_build_flag(&self) -> String {
        format!("{}{}", self.major, self.minor)
    }
}

impl std::fmt::Display for ComputeCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Placeholder values for argument and build templates
///
/// Known placeholders: `{device}`, `{burn_secs}`, `{cross_api_secs}`,
/// `{correctness_secs}` and (once queried) `{compute}`. Unknown ones stay verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    values: BTreeMap<&'static str, String>,
}

impl TemplateVars {
    pub fn from_context(ctx: &RunContext) -> Self {
        let durations = ctx.durations();
        let mut values = BTreeMap::new();
        values.insert("device", ctx.device_index().to_string());
        values.insert("burn_secs", durations.burn_in.as_secs().to_string());
        values.insert("cross_api_secs", durations.cross_api.as_secs().to_string());
        values.insert(
            "correctness_secs",
            durations
                .correctness_timeout
                .map(|d| d.as_secs())
                .unwrap_or(0)
                .to_string(),
        );
        Self { values }
    }

    pub fn with_compute(mut self, capability: ComputeCapability) -> Self {
        self.values.insert("compute", capability.as_build_flag());
        self
    }

    pub fn render(&self, template: &str) -> String {
        self.values
            .iter()
            .fold(template.to_string(), |acc, (key, value)| {
                acc.replace(&format!("{{{}}}", key), value)
            })
    }
}
