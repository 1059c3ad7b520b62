// Summary Reporter - renders and persists the run summary

use std::fmt::Write as _;
use std::path::Path;
use tracing::{info, warn};

use crate::application::classifier::Classifier;
use crate::domain::catalogue::{SUMMARY_JSON_FILE, SUMMARY_TEXT_FILE};
use crate::domain::{ProbeOutcome, ProbePlan, RunHeader, Summary, Verdict};
use crate::error::Result;

/// Outcomes recorded by the last probe phase of a run directory
pub const OUTCOMES_FILE: &str = "outcomes.json";

const RULE: &str = "------------------------------------------------------------";

/// Writes the report artifact; output depends only on the Summary
pub struct SummaryReporter;

impl SummaryReporter {
    /// Deterministic text report (only the header varies between runs)
    pub fn render_text(summary: &Summary) -> String {
        let mut out = String::new();
        let header = &summary.header;

        let _ = writeln!(out, "GPU VALIDATION SUMMARY");
        let _ = writeln!(out, "run_id:  {}", header.run_id);
        if let Some(device) = header.device_index {
            let _ = writeln!(out, "device:  {}", device);
        }
        if let Some(started) = &header.started {
            let _ = writeln!(out, "started: {}", started);
        }
        let _ = writeln!(out, "run_dir: {}", header.run_dir.display());
        let _ = writeln!(out, "{}", RULE);

        for check in &summary.checks {
            let _ = write!(out, "[{:<6}] {}", check.verdict.as_str(), check.name);
            if let Some(note) = &check.note {
                let _ = write!(out, " - {}", note);
            }
            out.push('\n');

            if matches!(check.verdict, Verdict::Fail | Verdict::Review) {
                for line in &check.evidence {
                    let _ = writeln!(out, "    | {}", line);
                }
            }
        }

        let _ = writeln!(out, "{}", RULE);
        let _ = writeln!(
            out,
            "checks: {}  ok: {}  fail: {}  warn: {}  review: {}",
            summary.checks.len(),
            summary.count(Verdict::Ok),
            summary.fail_count,
            summary.count(Verdict::Warn),
            summary.count(Verdict::Review),
        );
        if summary.count(Verdict::Warn) + summary.count(Verdict::Review) > 0 {
            let _ = writeln!(
                out,
                "ATTENTION: WARN/REVIEW checks are not counted as failures; inspect them manually"
            );
        }
        let _ = writeln!(
            out,
            "OVERALL: {} ({} failing check(s))",
            summary.overall, summary.fail_count
        );
        out
    }

    /// Write `summary.txt` and `summary.json` into `dir`
    pub fn write(summary: &Summary, dir: &Path) -> Result<()> {
        std::fs::write(dir.join(SUMMARY_TEXT_FILE), Self::render_text(summary))?;
        std::fs::write(
            dir.join(SUMMARY_JSON_FILE),
            serde_json::to_string_pretty(summary)?,
        )?;

        info!(
            run_dir = %dir.display(),
            overall = %summary.overall,
            fail_count = summary.fail_count,
            "Summary written"
        );
        Ok(())
    }
}

/// Persist probe outcomes next to the logs (input for re-classification)
pub fn write_outcomes(outcomes: &[ProbeOutcome], dir: &Path) -> Result<()> {
    std::fs::write(
        dir.join(OUTCOMES_FILE),
        serde_json::to_string_pretty(outcomes)?,
    )?;
    Ok(())
}

/// Re-run CLASSIFY and REPORT over an existing run directory
///
/// Reuses the recorded outcomes and header when present, so reclassifying
/// unchanged logs reproduces the original summary.
pub fn reclassify(classifier: &Classifier, plan: &ProbePlan, run_dir: &Path) -> Result<Summary> {
    let outcomes: Vec<ProbeOutcome> = match std::fs::read(run_dir.join(OUTCOMES_FILE)) {
        Ok(bytes) => serde_json::from_slice(&bytes)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(run_dir = %run_dir.display(), "No recorded outcomes, classifying logs only");
            Vec::new()
        }
        Err(e) => return Err(e.into()),
    };

    let header = std::fs::read(run_dir.join(SUMMARY_JSON_FILE))
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Summary>(&bytes).ok())
        .map(|previous| previous.header)
        .unwrap_or_else(|| RunHeader::from_run_dir(run_dir));

    let checks = classifier.classify_run(plan, run_dir, &outcomes);
    let summary = Summary::finalize(header, checks);
    SummaryReporter::write(&summary, run_dir)?;
    Ok(summary)
}
