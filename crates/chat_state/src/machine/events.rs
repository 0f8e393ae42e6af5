//! Session events - Defines events that trigger state transitions

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a session was terminated.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// A participant closed the chat.
    Manual,
    /// The expiry sweeper found the chat inactive.
    Expiration,
    /// Identity verification failed mid-session; the platform forfeits its cut.
    MismatchSelfie,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Manual => "manual",
            Self::Expiration => "expiration",
            Self::MismatchSelfie => "mismatch_selfie",
        };
        f.write_str(name)
    }
}

/// Defines the events that can trigger state transitions in the FSM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    /// Both participants spent their free messages in a paid chat.
    FreeAllowanceExhausted,

    /// The payer funded the prepaid bucket.
    DepositConfirmed,

    /// Roles were re-resolved for a free chat.
    RolesRefreshed {
        /// Whether the new roles leave the chat free.
        still_free: bool,
        /// Whether the free allowance under the new roles is already spent.
        allowance_exhausted: bool,
    },

    /// The session is being terminated.
    Closed { reason: CloseReason },
}

impl SessionEvent {
    /// Check if this event terminates the session.
    pub fn is_terminal_event(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FreeAllowanceExhausted => f.write_str("free_allowance_exhausted"),
            Self::DepositConfirmed => f.write_str("deposit_confirmed"),
            Self::RolesRefreshed { .. } => f.write_str("roles_refreshed"),
            Self::Closed { reason } => write!(f, "closed({reason})"),
        }
    }
}
