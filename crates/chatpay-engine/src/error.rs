//! Engine error types

use chat_state::{CloseReason, SessionState, TransitionError};
use chatpay_core::{ChatId, ConfigError, UserId};
use serde::Serialize;
use thiserror::Error;

use crate::ledger::LedgerError;
use crate::profile::ProfileError;

/// Precondition and internal failures. Nothing is committed when one of
/// these is returned; callers may retry the whole operation.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Session not found: {0}")]
    SessionNotFound(ChatId),

    #[error("Session already exists: {0}")]
    SessionExists(ChatId),

    #[error("{user} is not a participant of {chat_id}")]
    NotParticipant { chat_id: ChatId, user: UserId },

    #[error("{0} is not the payer of this chat")]
    NotPayer(UserId),

    #[error("Invalid participants: {0}")]
    InvalidParticipants(String),

    #[error("Chat {0} is free and cannot be funded")]
    FreeChat(ChatId),

    #[error("Chat {0} is already funded")]
    AlreadyFunded(ChatId),

    #[error("Insufficient funds: balance {balance}, price {price}")]
    InsufficientFunds { balance: u64, price: u64 },

    #[error("{0} closes cannot be requested by a participant")]
    ReservedCloseReason(CloseReason),

    #[error("Invalid transition: {0}")]
    InvalidTransition(#[from] TransitionError),

    #[error("Ledger error: {0}")]
    Ledger(LedgerError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<LedgerError> for EngineError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::InsufficientFunds {
                balance, required, ..
            } => Self::InsufficientFunds {
                balance,
                price: required,
            },
            other => Self::Ledger(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Why a message was not delivered.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    #[error("repeated message detected")]
    AbuseDetected,

    #[error("session is closed")]
    SessionClosed,

    #[error("session has expired")]
    SessionExpired,

    #[error("deposit required")]
    DepositRequired,

    #[error("insufficient balance: {required} tokens required, {remaining} remaining")]
    InsufficientBalance { required: u64, remaining: u64 },
}

impl Rejection {
    /// Rejection for a send into a terminal session.
    pub(crate) fn for_terminal(state: SessionState) -> Option<Self> {
        match state {
            SessionState::Expired => Some(Self::SessionExpired),
            SessionState::Closed => Some(Self::SessionClosed),
            _ => None,
        }
    }
}

/// Result of `process_message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MessageOutcome {
    pub allowed: bool,
    pub reason: Option<Rejection>,
    /// Tokens deducted from the prepaid bucket, zero for free deliveries.
    pub tokens_cost: u64,
}

impl MessageOutcome {
    pub fn delivered(tokens_cost: u64) -> Self {
        Self {
            allowed: true,
            reason: None,
            tokens_cost,
        }
    }

    pub fn rejected(reason: Rejection) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            tokens_cost: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_shortfall_maps_to_insufficient_funds() {
        let err: EngineError = LedgerError::InsufficientFunds {
            user: UserId::from("u"),
            balance: 40,
            required: 100,
        }
        .into();
        assert!(matches!(
            err,
            EngineError::InsufficientFunds {
                balance: 40,
                price: 100
            }
        ));
    }

    #[test]
    fn rejection_serializes_with_reason_tag() {
        let json = serde_json::to_value(Rejection::InsufficientBalance {
            required: 3,
            remaining: 2,
        })
        .unwrap();
        assert_eq!(json["reason"], "insufficient_balance");
        assert_eq!(json["required"], 3);
    }
}
