//! State transitions - FSM transition logic
//!
//! Implements the state machine that handles event-driven state transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::events::{CloseReason, SessionEvent};
use super::states::SessionState;

/// Error type for invalid state transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition from {from:?} with event {event}")]
    InvalidTransition { from: SessionState, event: String },

    #[error("Session is in terminal state: {0:?}")]
    TerminalState(SessionState),
}

/// Represents a state transition result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// The state before the transition.
    pub from: SessionState,
    /// The state after the transition.
    pub to: SessionState,
    /// The event that triggered the transition.
    pub event: SessionEvent,
    /// Whether the state actually changed.
    pub changed: bool,
    /// When the transition was applied.
    pub at: DateTime<Utc>,
}

/// State machine for managing session state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMachine {
    /// Current state.
    current_state: SessionState,
    /// Transition history (limited).
    history: Vec<StateTransition>,
    /// Max history entries to keep.
    max_history: usize,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine in FreeActive state.
    pub fn new() -> Self {
        Self::with_state(SessionState::FreeActive)
    }

    /// Create a state machine with a specific initial state.
    pub fn with_state(state: SessionState) -> Self {
        Self {
            current_state: state,
            history: Vec::new(),
            max_history: 50,
        }
    }

    /// Get the current state.
    pub fn state(&self) -> SessionState {
        self.current_state
    }

    /// Get the transition history.
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Handle an event and transition to a new state.
    ///
    /// Illegal events leave the machine untouched and return an error.
    pub fn handle_event(
        &mut self,
        event: SessionEvent,
        at: DateTime<Utc>,
    ) -> Result<StateTransition, TransitionError> {
        let old_state = self.current_state;
        let new_state = Self::compute_next_state(old_state, &event).map_err(|err| {
            debug!(from = ?old_state, %event, "rejected session transition");
            err
        })?;

        self.current_state = new_state;

        let transition = StateTransition {
            from: old_state,
            to: new_state,
            event,
            changed: old_state != new_state,
            at,
        };

        // Add to history
        self.history.push(transition.clone());
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        Ok(transition)
    }

    /// Compute the next state given current state and event.
    fn compute_next_state(
        state: SessionState,
        event: &SessionEvent,
    ) -> Result<SessionState, TransitionError> {
        if state.is_terminal() {
            return Err(TransitionError::TerminalState(state));
        }

        let next = match (state, event) {
            // ========== Free phase ==========
            (SessionState::FreeActive, SessionEvent::FreeAllowanceExhausted) => {
                SessionState::AwaitingPrepaid
            }
            (
                SessionState::FreeActive,
                SessionEvent::RolesRefreshed {
                    still_free,
                    allowance_exhausted,
                },
            ) => {
                if !*still_free && *allowance_exhausted {
                    SessionState::AwaitingPrepaid
                } else {
                    SessionState::FreeActive
                }
            }

            // ========== Funding ==========
            (
                SessionState::FreeActive | SessionState::AwaitingPrepaid,
                SessionEvent::DepositConfirmed,
            ) => SessionState::PaidActive,

            // ========== Termination ==========
            (
                _,
                SessionEvent::Closed {
                    reason: CloseReason::Expiration,
                },
            ) => SessionState::Expired,
            (_, SessionEvent::Closed { .. }) => SessionState::Closed,

            (from, event) => {
                return Err(TransitionError::InvalidTransition {
                    from,
                    event: event.to_string(),
                })
            }
        };

        Ok(next)
    }

    /// Check if a transition is valid without executing it.
    pub fn can_handle(&self, event: &SessionEvent) -> bool {
        Self::compute_next_state(self.current_state, event).is_ok()
    }
}
