//! Pipeline state machine
//!
//! The orchestrator moves through these states in order; the table below is
//! the only source of truth for what may follow what.

use crate::error::StateMachineError;
use serde::{Deserialize, Serialize};

/// State of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    Idle,
    Validating,
    AuxPersist,
    Building,
    Persisting,
    AwaitingCapability,
    Opening,
    AwaitingSession,
    Executing,
    Succeeded,
    Failed,
}

impl PipelineState {
    /// Check if no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// States reachable from `from`
pub fn allowed_transitions(from: PipelineState) -> Vec<PipelineState> {
    use PipelineState::*;
    match from {
        Idle => vec![Validating],
        Validating => vec![Idle, AuxPersist, Building, Failed],
        AuxPersist => vec![AuxPersist, Building, Failed],
        Building => vec![Persisting, Failed],
        Persisting => vec![AwaitingCapability, Failed],
        AwaitingCapability => vec![Opening, Failed],
        Opening => vec![AwaitingSession, Failed],
        AwaitingSession => vec![Executing, Failed],
        Executing => vec![Succeeded, Failed],
        Succeeded => vec![],
        Failed => vec![],
    }
}

/// Validates a state transition
pub fn validate_transition(from: PipelineState, to: PipelineState) -> Result<(), StateMachineError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition { from, to })
    }
}

/// Ordered record of the states one run visited
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTrace {
    states: Vec<PipelineState>,
}

impl PipelineTrace {
    /// Trace starting in `Idle`
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: vec![PipelineState::Idle],
        }
    }

    /// Current state
    #[must_use]
    pub fn current(&self) -> PipelineState {
        self.states
            .last()
            .copied()
            .unwrap_or(PipelineState::Idle)
    }

    /// Move to `to` if the table allows it
    pub fn advance(&mut self, to: PipelineState) -> Result<(), StateMachineError> {
        validate_transition(self.current(), to)?;
        tracing::debug!(from = ?self.current(), to = ?to, "pipeline transition");
        self.states.push(to);
        Ok(())
    }

    /// Every state visited, in order
    #[must_use]
    pub fn states(&self) -> &[PipelineState] {
        &self.states
    }
}

impl Default for PipelineTrace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [PipelineState; 11] = [
        PipelineState::Idle,
        PipelineState::Validating,
        PipelineState::AuxPersist,
        PipelineState::Building,
        PipelineState::Persisting,
        PipelineState::AwaitingCapability,
        PipelineState::Opening,
        PipelineState::AwaitingSession,
        PipelineState::Executing,
        PipelineState::Succeeded,
        PipelineState::Failed,
    ];

    #[test]
    fn happy_path_is_allowed() {
        let mut trace = PipelineTrace::new();
        for state in [
            PipelineState::Validating,
            PipelineState::AuxPersist,
            PipelineState::AuxPersist,
            PipelineState::Building,
            PipelineState::Persisting,
            PipelineState::AwaitingCapability,
            PipelineState::Opening,
            PipelineState::AwaitingSession,
            PipelineState::Executing,
            PipelineState::Succeeded,
        ] {
            trace.advance(state).unwrap();
        }
        assert!(trace.current().is_terminal());
        assert_eq!(trace.states().len(), 11);
    }

    #[test]
    fn skipping_persistence_is_illegal() {
        assert!(validate_transition(PipelineState::Building, PipelineState::Opening).is_err());
        assert!(validate_transition(PipelineState::Validating, PipelineState::Executing).is_err());
    }

    #[test]
    fn terminal_states_are_final() {
        for to in ALL {
            assert!(validate_transition(PipelineState::Succeeded, to).is_err());
            assert!(validate_transition(PipelineState::Failed, to).is_err());
        }
    }

    #[test]
    fn failed_trace_keeps_current_state() {
        let mut trace = PipelineTrace::new();
        trace.advance(PipelineState::Validating).unwrap();
        let err = trace.advance(PipelineState::Succeeded).unwrap_err();
        assert_eq!(
            err,
            StateMachineError::IllegalTransition {
                from: PipelineState::Validating,
                to: PipelineState::Succeeded,
            }
        );
        assert_eq!(trace.current(), PipelineState::Validating);
    }

    proptest! {
        #[test]
        fn prop_validate_matches_table(from in 0usize..11, to in 0usize..11) {
            let (from, to) = (ALL[from], ALL[to]);
            let allowed = allowed_transitions(from);
            prop_assert_eq!(validate_transition(from, to).is_ok(), allowed.contains(&to));
        }
    }
}
