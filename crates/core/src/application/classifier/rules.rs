// Fault Rule Table - declarative probe category -> match rules

use regex::Regex;

use crate::domain::ProbeCategory;

/// Uncompiled rule, as written in the table
#[derive(Debug, Clone, Copy)]
pub struct RuleSpec {
    pub category: ProbeCategory,
    /// Stage-one filter; only matching lines are checked for faults
    pub scope: Option<&'static str>,
    /// Confirmed fault signatures (FAIL)
    pub faults: &'static [&'static str],
    /// Ambiguous text that needs a human (REVIEW)
    pub review: &'static [&'static str],
    /// Success markers that must appear somewhere in the log (absent => FAIL)
    pub required: &'static [&'static str],
    /// An existing but empty log is OK rather than WARN
    pub empty_is_ok: bool,
}

/// GPU vendor/driver namespace tokens for kernel lines
pub const KERNEL_SCOPE: &str = r"(?i)\b(nvrm|nvidia|nvlink|nvswitch)\b";

/// Built-in rule table
pub const STANDARD_RULES: &[RuleSpec] = &[
    RuleSpec {
        category: ProbeCategory::Kernel,
        scope: Some(KERNEL_SCOPE),
        faults: &[
            r"\bXid\b",
            r"(?i)fallen off the bus",
            r"(?i)\bgpu is lost\b",
            r"(?i)\bAER\b.*\b(uncorrected|fatal)\b",
            r"(?i)\buncorrectable\b",
            r"\bUncorrected\b",
            r"(?i)\bfatal error\b",
        ],
        review: &[],
        required: &[],
        empty_is_ok: true,
    },
    RuleSpec {
        category: ProbeCategory::Bandwidth,
        scope: None,
        faults: &[
            r"Result = FAIL",
            r"(?i)\bcuda error\b",
            r"\bcudaError",
            r"\bFAILED\b",
            r"(?i)no cuda-capable device",
        ],
        review: &[],
        required: &[r"Result = PASS"],
        empty_is_ok: false,
    },
    RuleSpec {
        category: ProbeCategory::BurnIn,
        scope: None,
        faults: &[
            r"GPU\s+\d+:\s+FAULTY",
            r"(?i)couldn't init",
            r"(?i)\bcuda error\b",
            r"(?i)failure during compute",
        ],
        review: &[],
        required: &[r"GPU\s+\d+:\s+OK"],
        empty_is_ok: false,
    },
    RuleSpec {
        category: ProbeCategory::VramCorrectness,
        scope: None,
        faults: &[
            r"\bERROR\b",
            r"\bFAILED\b",
            r"(?i)segmentation fault",
            r"(?i)\bunrecoverable\b",
        ],
        // lowercase "error" shows up in benign progress text
        review: &[r"\berror\b"],
        required: &[],
        empty_is_ok: false,
    },
    RuleSpec {
        category: ProbeCategory::CrossApiVram,
        scope: None,
        faults: &[
            r"(?i)\berror found\b",
            r"(?i)\berrors? found:?\s*[1-9]",
            r"\bFAIL",
            r"ERROR_DEVICE_LOST",
        ],
        review: &[],
        required: &[],
        empty_is_ok: false,
    },
];

/// Success marker with its source pattern (for notes)
#[derive(Debug, Clone)]
pub struct Marker {
    pub pattern: String,
    pub regex: Regex,
}

/// Compiled rule for one category
#[derive(Debug, Clone)]
pub struct FaultRule {
    pub category: ProbeCategory,
    pub scope: Option<Regex>,
    pub faults: Vec<Regex>,
    pub review: Vec<Regex>,
    pub required: Vec<Marker>,
    pub empty_is_ok: bool,
}

impl FaultRule {
    pub fn compile(spec: &RuleSpec) -> Result<Self, regex::Error> {
        let compile_all = |patterns: &[&str]| -> Result<Vec<Regex>, regex::Error> {
            patterns.iter().map(|p| Regex::new(p)).collect()
        };

        Ok(Self {
            category: spec.category,
            scope: spec.scope.map(Regex::new).transpose()?,
            faults: compile_all(spec.faults)?,
            review: compile_all(spec.review)?,
            required: spec
                .required
                .iter()
                .map(|p| {
                    Ok(Marker {
                        pattern: p.to_string(),
                        regex: Regex::new(p)?,
                    })
                })
                .collect::<Result<_, regex::Error>>()?,
            empty_is_ok: spec.empty_is_ok,
        })
    }

    /// Stage one: line is in scope for fault matching
    pub fn in_scope(&self, line: &str) -> bool {
        self.scope.as_ref().map_or(true, |s| s.is_match(line))
    }

    /// Stage two: line carries a fault signature
    pub fn is_fault(&self, line: &str) -> bool {
        self.faults.iter().any(|f| f.is_match(line))
    }

    pub fn is_review(&self, line: &str) -> bool {
        self.review.iter().any(|r| r.is_match(line))
    }
}

/// Compiled table, one rule per category
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<FaultRule>,
}

impl RuleTable {
    pub fn compile(specs: &[RuleSpec]) -> Result<Self, regex::Error> {
        Ok(Self {
            rules: specs.iter().map(FaultRule::compile).collect::<Result<_, _>>()?,
        })
    }

    pub fn standard() -> Result<Self, regex::Error> {
        Self::compile(STANDARD_RULES)
    }

    pub fn rule_for(&self, category: ProbeCategory) -> Option<&FaultRule> {
        self.rules.iter().find(|r| r.category == category)
    }
}
