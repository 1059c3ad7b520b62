// Summary - aggregated verdict of one run

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::check::{CheckResult, Verdict};
use super::run_context::RunContext;

/// Process exit codes (the sole automation-facing PASS/FAIL signal)
pub mod exit_code {
    /// Overall PASS
    pub const PASS: i32 = 0;
    /// Overall FAIL (at least one FAIL verdict)
    pub const FAIL: i32 = 1;
    /// Configuration or dependency error before classification
    pub const FATAL: i32 = 2;
    /// Whole run interrupted externally (128 + SIGINT)
    pub const INTERRUPTED: i32 = 130;
}

/// Overall verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallVerdict {
    Pass,
    Fail,
}

impl std::fmt::Display for OverallVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverallVerdict::Pass => write!(f, "PASS"),
            OverallVerdict::Fail => write!(f, "FAIL"),
        }
    }
}

/// Run header; the only non-reproducible part of a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHeader {
    pub run_id: String,
    pub device_index: Option<u32>,
    /// Start timestamp as it appears in the run directory name
    pub started: Option<String>,
    pub run_dir: PathBuf,
}

impl RunHeader {
    pub fn from_context(ctx: &RunContext) -> Self {
        Self {
            run_id: ctx.run_id().to_string(),
            device_index: Some(ctx.device_index()),
            started: Some(
                ctx.created_at()
                    .format(super::run_context::RUN_DIR_TIMESTAMP_FORMAT)
                    .to_string(),
            ),
            run_dir: ctx.run_dir(),
        }
    }

    /// Recover the header from an existing `<run_id>_<YYYYmmdd>_<HHMMSS>` directory
    pub fn from_run_dir(run_dir: &Path) -> Self {
        let name = run_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let parsed = name.rsplitn(3, '_').collect::<Vec<_>>();
        let (run_id, started) = match parsed.as_slice() {
            [time, date, id]
                if !id.is_empty()
                    && date.len() == 8
                    && time.len() == 6
                    && date.chars().chain(time.chars()).all(|c| c.is_ascii_digit()) =>
            {
                (id.to_string(), Some(format!("{}_{}", date, time)))
            }
            _ => (name.clone(), None),
        };

        Self {
            run_id,
            device_index: None,
            started,
            run_dir: run_dir.to_path_buf(),
        }
    }
}

/// Finalized run summary; written once, never amended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub header: RunHeader,
    /// Kernel check first, then probe checks in sequence order
    pub checks: Vec<CheckResult>,
    pub fail_count: usize,
    pub overall: OverallVerdict,
}

impl Summary {
    pub fn finalize(header: RunHeader, checks: Vec<CheckResult>) -> Self {
        let fail_count = checks.iter().filter(|c| c.is_fail()).count();
        let overall = if fail_count == 0 {
            OverallVerdict::Pass
        } else {
            OverallVerdict::Fail
        };

        Self {
            header,
            checks,
            fail_count,
            overall,
        }
    }

    pub fn count(&self, verdict: Verdict) -> usize {
        self.checks.iter().filter(|c| c.verdict == verdict).count()
    }

    /// Pure function of the fail count
    pub fn exit_code(&self) -> i32 {
        if self.fail_count == 0 {
            exit_code::PASS
        } else {
            exit_code::FAIL
        }
    }
}
