//! Pipeline lifecycle state machine.
//!
//! Legal transitions:
//! Stopped -> Starting -> Running -> Draining -> Stopped.
//! Starting may also fall straight back to Stopped when initialization
//! fails before the run loop begins.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Starting,
    Running,
    Draining,
}

impl PipelineState {
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Stopped, Starting) | (Starting, Running) | (Starting, Stopped) | (Running, Draining) | (Draining, Stopped)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Stopped => "stopped",
            PipelineState::Starting => "starting",
            PipelineState::Running => "running",
            PipelineState::Draining => "draining",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_lifecycle_path() {
        use PipelineState::*;
        assert!(Stopped.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Draining));
        assert!(Draining.can_transition_to(Stopped));
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        use PipelineState::*;
        assert!(!Running.can_transition_to(Stopped)); // must drain first
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Draining.can_transition_to(Running));
        assert!(!Running.can_transition_to(Starting));
    }
}
