// Domain Layer - Pure run model (no I/O)

pub mod catalogue;
pub mod check;
pub mod error;
pub mod outcome;
pub mod probe;
pub mod run_context;
pub mod summary;

// Re-exports
pub use catalogue::ProbePlan;
pub use check::{CheckResult, Verdict};
pub use error::DomainError;
pub use outcome::ProbeOutcome;
pub use probe::{
    BuildRecipe, CancelMode, ComputeCapability, ProbeCategory, ProbeInvocation, ProbeSpec,
    Provisioning, TemplateVars,
};
pub use run_context::{ProbeDurations, RunContext, RunId};
pub use summary::{exit_code, OverallVerdict, RunHeader, Summary};
