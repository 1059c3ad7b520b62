// Check Result - per-probe verdict produced by the Failure Classifier

use serde::{Deserialize, Serialize};

use super::probe::ProbeCategory;

/// Per-check verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// No fault signature, success markers present
    Ok,
    /// Confirmed fault signature or missing success marker
    Fail,
    /// Log missing or empty
    Warn,
    /// Ambiguous text found, human must look
    Review,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Ok => "OK",
            Verdict::Fail => "FAIL",
            Verdict::Warn => "WARN",
            Verdict::Review => "REVIEW",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict for one check plus bounded evidence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub category: ProbeCategory,
    pub verdict: Verdict,
    /// Matching log lines, verbatim (bounded tail)
    pub evidence: Vec<String>,
    /// Short human-readable reason
    pub note: Option<String>,
}

impl CheckResult {
    pub fn new(name: impl Into<String>, category: ProbeCategory, verdict: Verdict) -> Self {
        Self {
            name: name.into(),
            category,
            verdict,
            evidence: Vec::new(),
            note: None,
        }
    }

    pub fn with_evidence(mut self, evidence: Vec<String>) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn is_fail(&self) -> bool {
        self.verdict == Verdict::Fail
    }
}
