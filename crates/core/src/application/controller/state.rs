// Run Controller State Machine

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

/// Controller states; COMPLETE and ABORTED are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    ValidateContext,
    StartMonitor,
    EnsureBinaries,
    RunProbes,
    Classify,
    Report,
    Complete,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Complete | RunState::Aborted)
    }

    /// Allowed forward transition (any non-terminal state may abort)
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (s, Aborted) => !s.is_terminal(),
            (Init, ValidateContext)
            | (ValidateContext, StartMonitor)
            | (StartMonitor, EnsureBinaries)
            | (EnsureBinaries, RunProbes)
            | (RunProbes, Classify)
            | (Classify, Report)
            | (Report, Complete) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Init => "INIT",
            RunState::ValidateContext => "VALIDATE_CONTEXT",
            RunState::StartMonitor => "START_MONITOR",
            RunState::EnsureBinaries => "ENSURE_BINARIES",
            RunState::RunProbes => "RUN_PROBES",
            RunState::Classify => "CLASSIFY",
            RunState::Report => "REPORT",
            RunState::Complete => "COMPLETE",
            RunState::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// Current state of one run
pub struct StateTracker {
    tx: watch::Sender<RunState>,
}

impl StateTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RunState::Init);
        Self { tx }
    }

    pub fn current(&self) -> RunState {
        *self.tx.borrow()
    }

    /// Move to `next`; illegal transitions are logged and ignored
    pub fn enter(&self, next: RunState) {
        let current = self.current();
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "Ignoring illegal state transition");
            return;
        }
        info!(from = %current, to = %next, "Run state transition");
        self.tx.send_replace(next);
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            RunState::Init,
            RunState::ValidateContext,
            RunState::StartMonitor,
            RunState::EnsureBinaries,
            RunState::RunProbes,
            RunState::Classify,
            RunState::Report,
            RunState::Complete,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        assert!(!RunState::Complete.can_transition_to(RunState::Aborted));
        assert!(!RunState::Aborted.can_transition_to(RunState::ValidateContext));
        assert!(RunState::EnsureBinaries.can_transition_to(RunState::Aborted));
    }

    #[test]
    fn test_skipping_states_is_rejected() {
        let tracker = StateTracker::new();
        tracker.enter(RunState::RunProbes);
        assert_eq!(tracker.current(), RunState::Init);

        tracker.enter(RunState::ValidateContext);
        tracker.enter(RunState::Aborted);
        assert_eq!(tracker.current(), RunState::Aborted);
        assert!(tracker.current().is_terminal());
    }
}
