// Failure Classifier - turns captured logs into per-check verdicts

pub mod rules;

pub use rules::{FaultRule, RuleSpec, RuleTable, STANDARD_RULES};

use std::path::Path;
use tracing::{debug, warn};

use crate::domain::catalogue::{KERNEL_CHECK_NAME, KERNEL_LOG_FILE};
use crate::domain::{CheckResult, ProbeCategory, ProbeOutcome, ProbePlan, Verdict};

/// Maximum evidence lines kept per check (tail of the matches)
pub const EVIDENCE_TAIL: usize = 20;

/// Applies the rule table to logs; pure given identical inputs
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: RuleTable,
}

impl Classifier {
    pub fn new(rules: RuleTable) -> Self {
        Self { rules }
    }

    pub fn standard() -> Result<Self, regex::Error> {
        Ok(Self::new(RuleTable::standard()?))
    }

    /// Classify log text for one check
    ///
    /// # Arguments
    /// * `name` - Check name
    /// * `category` - Selects the fault rule
    /// * `log` - Log contents, or None when the file is missing
    /// * `outcome` - Process outcome, when the check belongs to a probe
    pub fn classify_text(
        &self,
        name: &str,
        category: ProbeCategory,
        log: Option<&str>,
        outcome: Option<&ProbeOutcome>,
    ) -> CheckResult {
        let Some(rule) = self.rules.rule_for(category) else {
            return CheckResult::new(name, category, Verdict::Review)
                .with_note(format!("no fault rule for category {}", category));
        };

        let text = match log {
            Some(text) => text,
            None => {
                let note = match outcome.and_then(|o| o.spawn_error.as_deref()) {
                    Some(reason) => format!("log missing (probe did not start: {})", reason),
                    None => "log missing".to_string(),
                };
                return CheckResult::new(name, category, Verdict::Warn).with_note(note);
            }
        };

        if text.trim().is_empty() {
            if rule.empty_is_ok {
                return CheckResult::new(name, category, Verdict::Ok);
            }
            return CheckResult::new(name, category, Verdict::Warn).with_note("log empty");
        }

        let lines: Vec<&str> = text.lines().map(|l| l.trim_end_matches('\r')).collect();

        let faults: Vec<&str> = lines
            .iter()
            .copied()
            .filter(|line| rule.in_scope(line) && rule.is_fault(line))
            .collect();
        if !faults.is_empty() {
            return CheckResult::new(name, category, Verdict::Fail)
                .with_evidence(tail(&faults))
                .with_note(format!("{} fault line(s) matched", faults.len()));
        }

        let missing: Vec<&str> = rule
            .required
            .iter()
            .filter(|m| !m.regex.is_match(text))
            .map(|m| m.pattern.as_str())
            .collect();
        if !missing.is_empty() {
            return CheckResult::new(name, category, Verdict::Fail)
                .with_note(format!("missing success marker: {}", missing.join(", ")));
        }

        let review: Vec<&str> = lines
            .iter()
            .copied()
            .filter(|line| rule.is_review(line))
            .collect();
        if !review.is_empty() {
            return CheckResult::new(name, category, Verdict::Review)
                .with_evidence(tail(&review))
                .with_note(format!("{} ambiguous line(s), needs review", review.len()));
        }

        if let Some(outcome) = outcome.filter(|o| o.exited_abnormally()) {
            return CheckResult::new(name, category, Verdict::Review).with_note(format!(
                "exited with code {} without a fault signature",
                outcome.exit_code.unwrap_or(-1)
            ));
        }

        let mut result = CheckResult::new(name, category, Verdict::Ok);
        if outcome.is_some_and(|o| o.interrupted) {
            result = result.with_note("stopped by interrupt after its time box");
        }
        result
    }

    /// Classify a log file on disk
    pub fn classify_log(
        &self,
        name: &str,
        category: ProbeCategory,
        log_path: &Path,
        outcome: Option<&ProbeOutcome>,
    ) -> CheckResult {
        let text = read_log(log_path);
        let result = self.classify_text(name, category, text.as_deref(), outcome);
        debug!(check = %name, verdict = %result.verdict, "Check classified");
        result
    }

    /// Kernel check first, then one check per probe in plan order
    pub fn classify_run(
        &self,
        plan: &ProbePlan,
        run_dir: &Path,
        outcomes: &[ProbeOutcome],
    ) -> Vec<CheckResult> {
        let mut results = Vec::with_capacity(plan.probes().len() + 1);
        results.push(self.classify_log(
            KERNEL_CHECK_NAME,
            ProbeCategory::Kernel,
            &run_dir.join(KERNEL_LOG_FILE),
            None,
        ));

        for probe in plan.probes() {
            let outcome = outcomes.iter().find(|o| o.name == probe.name);
            results.push(self.classify_log(
                &probe.name,
                probe.category,
                &run_dir.join(&probe.log_file),
                outcome,
            ));
        }
        results
    }
}

fn tail(lines: &[&str]) -> Vec<String> {
    let start = lines.len().saturating_sub(EVIDENCE_TAIL);
    lines[start..].iter().map(|l| l.to_string()).collect()
}

/// Read a log lossily; None when it cannot be read
fn read_log(path: &Path) -> Option<String> {
    match std::fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Log unreadable, treating as missing");
            None
        }
    }
}
