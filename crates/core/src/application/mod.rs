// Application Layer - Run orchestration, classification and reporting

pub mod classifier;
pub mod controller;
pub mod reporter;

// Re-exports
pub use classifier::Classifier;
pub use controller::{
    shutdown_channel, MonitorGuard, RunController, RunError, RunReport, RunState, ShutdownSender,
    ShutdownToken,
};
pub use reporter::{reclassify, write_outcomes, SummaryReporter, OUTCOMES_FILE};
