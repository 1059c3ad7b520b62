// Run Context - immutable parameters of one validation run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{DomainError, Result};

/// Timestamp format used in run directory names (`<run_id>_<timestamp>`)
pub const RUN_DIR_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Directory under the installation root that holds run directories by default
pub const DEFAULT_LOGS_DIR: &str = "logs";

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Sanitized run identifier (charset `[A-Za-z0-9_-]`, never empty)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Sanitize a raw identifier.
    ///
    /// Identifiers made only of safe characters are returned unchanged.
    /// Otherwise each run of unsafe characters collapses to a single `_` and
    /// leading/trailing `_` are trimmed; an identifier that sanitizes to
    /// nothing is rejected.
    ///
    /// # Example
    /// ```text
    /// RunId::sanitize("rtx 4090 #2") -> "rtx_4090_2"
    /// RunId::sanitize("  ") -> Err(InvalidRunId)
    /// ```
    pub fn sanitize(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(DomainError::InvalidRunId("run identifier is empty".to_string()));
        }

        if raw.chars().all(is_safe_char) {
            return Ok(Self(raw.to_string()));
        }

        let mut collapsed = String::with_capacity(raw.len());
        let mut in_unsafe_run = false;
        for c in raw.chars() {
            if is_safe_char(c) {
                collapsed.push(c);
                in_unsafe_run = false;
            } else if !in_unsafe_run {
                collapsed.push('_');
                in_unsafe_run = true;
            }
        }
        let trimmed = collapsed.trim_matches('_');

        if trimmed.is_empty() {
            return Err(DomainError::InvalidRunId(format!(
                "'{}' contains no usable characters",
                raw.escape_debug()
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Configured probe durations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeDurations {
    /// Compute burn-in length (passed to the burn-in tool)
    pub burn_in: Duration,
    /// Cross-API VRAM probe length (interrupt delivered after this)
    pub cross_api: Duration,
    /// Optional cutoff for the VRAM-correctness probe (None = unbounded)
    pub correctness_timeout: Option<Duration>,
}

impl ProbeDurations {
    /// Build durations from whole seconds. `correctness_secs == 0` means unbounded.
    pub fn from_secs(burn_in_secs: u64, cross_api_secs: u64, correctness_secs: u64) -> Result<Self> {
        if burn_in_secs == 0 {
            return Err(DomainError::InvalidDuration {
                name: "burn_in".to_string(),
                reason: "must be at least 1 second".to_string(),
            });
        }
        if cross_api_secs == 0 {
            return Err(DomainError::InvalidDuration {
                name: "cross_api".to_string(),
                reason: "must be at least 1 second".to_string(),
            });
        }

        Ok(Self {
            burn_in: Duration::from_secs(burn_in_secs),
            cross_api: Duration::from_secs(cross_api_secs),
            correctness_timeout: (correctness_secs > 0)
                .then(|| Duration::from_secs(correctness_secs)),
        })
    }
}

/// Immutable run parameters, built once at startup and shared read-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    run_id: RunId,
    device_index: u32,
    durations: ProbeDurations,
    install_root: PathBuf,
    logs_root: PathBuf,
    created_at: DateTime<Utc>,
}

impl RunContext {
    /// Create a run context
    ///
    /// # Arguments
    /// * `raw_run_id` - Operator-supplied identifier (sanitized here)
    /// * `device_index` - Target GPU index
    /// * `durations` - Probe durations
    /// * `install_root` - Directory holding the probe sources/binaries
    /// * `logs_root` - Override for the run directory parent (default `<install_root>/logs`)
    /// * `created_at` - Run creation time (names the run directory)
    pub fn new(
        raw_run_id: &str,
        device_index: u32,
        durations: ProbeDurations,
        install_root: impl Into<PathBuf>,
        logs_root: Option<PathBuf>,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let run_id = RunId::sanitize(raw_run_id)?;
        let install_root = install_root.into();

        if install_root.as_os_str().is_empty() {
            return Err(DomainError::InvalidInstallRoot(
                "installation root is empty".to_string(),
            ));
        }

        let logs_root = logs_root.unwrap_or_else(|| install_root.join(DEFAULT_LOGS_DIR));

        Ok(Self {
            run_id,
            device_index,
            durations,
            install_root,
            logs_root,
            created_at,
        })
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn device_index(&self) -> u32 {
        self.device_index
    }

    pub fn durations(&self) -> &ProbeDurations {
        &self.durations
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    pub fn logs_root(&self) -> &Path {
        &self.logs_root
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// `<run_id>_<YYYYmmdd_HHMMSS>`
    pub fn run_dir_name(&self) -> String {
        format!(
            "{}_{}",
            self.run_id,
            self.created_at.format(RUN_DIR_TIMESTAMP_FORMAT)
        )
    }

    /// Directory holding every artifact of this run
    pub fn run_dir(&self) -> PathBuf {
        self.logs_root.join(self.run_dir_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn durations() -> ProbeDurations {
        ProbeDurations::from_secs(600, 300, 0).unwrap()
    }

    #[test]
    fn test_safe_identifier_is_unchanged() {
        for raw in ["rtx4090", "node-07_gpu2", "_lead", "trail-", "___", "-"] {
            assert_eq!(RunId::sanitize(raw).unwrap().as_str(), raw);
        }
    }

    #[test]
    fn test_unsafe_runs_collapse_to_one_underscore() {
        assert_eq!(RunId::sanitize("rtx 4090").unwrap().as_str(), "rtx_4090");
        assert_eq!(RunId::sanitize("rtx 4090 #2").unwrap().as_str(), "rtx_4090_2");
        assert_eq!(RunId::sanitize("a/b.c").unwrap().as_str(), "a_b_c");
        assert_eq!(RunId::sanitize("  card#1  ").unwrap().as_str(), "card_1");
        assert_eq!(RunId::sanitize("ünïcode").unwrap().as_str(), "n_code");
        // Safe underscores next to an unsafe run are kept
        assert_eq!(RunId::sanitize("a_ b").unwrap().as_str(), "a__b");
    }

    #[test]
    fn test_unsafe_only_identifier_is_rejected() {
        assert!(RunId::sanitize("").is_err());
        assert!(RunId::sanitize("   ").is_err());
        assert!(RunId::sanitize("!@#$%").is_err());
        assert!(matches!(
            RunId::sanitize("../.."),
            Err(DomainError::InvalidRunId(_))
        ));
    }

    #[test]
    fn test_sanitized_output_uses_safe_charset() {
        let id = RunId::sanitize("weird: id (v2) / test").unwrap();
        assert!(id.as_str().chars().all(is_safe_char));
        assert!(!id.as_str().starts_with('_'));
        assert!(!id.as_str().ends_with('_'));
    }

    #[test]
    fn test_durations_zero_correctness_is_unbounded() {
        let d = ProbeDurations::from_secs(10, 20, 0).unwrap();
        assert_eq!(d.burn_in, Duration::from_secs(10));
        assert_eq!(d.cross_api, Duration::from_secs(20));
        assert!(d.correctness_timeout.is_none());

        let d = ProbeDurations::from_secs(10, 20, 30).unwrap();
        assert_eq!(d.correctness_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_durations_reject_zero_burn_in() {
        assert!(ProbeDurations::from_secs(0, 20, 0).is_err());
        assert!(ProbeDurations::from_secs(10, 0, 0).is_err());
    }

    #[test]
    fn test_run_dir_layout() {
        let created = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let ctx = RunContext::new(
            "bench #1",
            0,
            durations(),
            "/opt/gpuval",
            None,
            created,
        )
        .unwrap();

        assert_eq!(ctx.run_dir_name(), "bench_1_20260314_092653");
        assert_eq!(
            ctx.run_dir(),
            PathBuf::from("/opt/gpuval/logs/bench_1_20260314_092653")
        );
    }

    #[test]
    fn test_logs_root_override() {
        let created = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let ctx = RunContext::new(
            "r",
            1,
            durations(),
            "/opt/gpuval",
            Some(PathBuf::from("/var/log/gpuval")),
            created,
        )
        .unwrap();

        assert_eq!(ctx.logs_root(), Path::new("/var/log/gpuval"));
        assert!(ctx.run_dir().starts_with("/var/log/gpuval"));
    }

    #[test]
    fn test_empty_install_root_rejected() {
        let result = RunContext::new("r", 0, durations(), "", None, Utc::now());
        assert!(matches!(result, Err(DomainError::InvalidInstallRoot(_))));
    }
}
