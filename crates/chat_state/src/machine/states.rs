//! Session states - Defines all possible states of a chat session

use serde::{Deserialize, Serialize};

/// Lifecycle state of a chat session.
///
/// `Expired` and `Closed` are terminal: a session never leaves them and a new
/// chat id is required for further interaction.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Initial state: participants spend their free message allowance.
    FreeActive,

    /// Free allowance spent; every send is rejected until the payer deposits.
    AwaitingPrepaid,

    /// Funded by a deposit; the earner's messages are metered.
    PaidActive,

    /// Closed by the expiry sweeper after inactivity.
    Expired,

    /// Closed manually or by the safety closer.
    Closed,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::FreeActive
    }
}

impl SessionState {
    /// Check if this is a terminal state (no more transitions expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Closed)
    }

    /// States the expiry sweeper scans.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether a deposit may be captured in this state.
    pub fn accepts_deposit(&self) -> bool {
        matches!(self, Self::FreeActive | Self::AwaitingPrepaid)
    }

    /// Get a human-readable description of the current state.
    pub fn description(&self) -> &str {
        match self {
            Self::FreeActive => "Free messages available",
            Self::AwaitingPrepaid => "Waiting for deposit",
            Self::PaidActive => "Paid chat in progress",
            Self::Expired => "Expired after inactivity",
            Self::Closed => "Closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_free_active() {
        assert_eq!(SessionState::default(), SessionState::FreeActive);
    }

    #[test]
    fn test_terminal_state_detection() {
        assert!(SessionState::Expired.is_terminal());
        assert!(SessionState::Closed.is_terminal());
        assert!(!SessionState::PaidActive.is_terminal());
        assert!(SessionState::AwaitingPrepaid.is_active());
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(
            serde_json::to_string(&SessionState::AwaitingPrepaid).unwrap(),
            "\"AWAITING_PREPAID\""
        );
    }
}
