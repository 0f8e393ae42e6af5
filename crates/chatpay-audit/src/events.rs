use chat_state::CloseReason;
use chatpay_core::{ChatId, ChatMode, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata attached to every audit event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    /// Unique event ID (UUID v4)
    pub event_id: String,
    /// When the event occurred, on the engine's clock
    pub occurred_at: DateTime<Utc>,
}

impl EventMeta {
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(occurred_at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            occurred_at,
        }
    }
}

impl Default for EventMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Append-only record of money movements and lifecycle changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    SessionOpened {
        meta: EventMeta,
        chat_id: ChatId,
        payer_id: UserId,
        earner_id: Option<UserId>,
        mode: ChatMode,
        price: u64,
    },
    DepositCaptured {
        meta: EventMeta,
        chat_id: ChatId,
        payer_id: UserId,
        amount: u64,
        escrow_amount: u64,
        platform_fee: u64,
    },
    MessageBilled {
        meta: EventMeta,
        chat_id: ChatId,
        earner_id: UserId,
        tokens: u64,
        words: u64,
    },
    RefundIssued {
        meta: EventMeta,
        chat_id: ChatId,
        payer_id: UserId,
        amount: u64,
        reason: CloseReason,
    },
    SessionClosed {
        meta: EventMeta,
        chat_id: ChatId,
        closed_by: Option<UserId>,
        reason: CloseReason,
        refund: u64,
    },
    /// A participant was flagged for manual review after a selfie mismatch.
    AccountFlagged {
        meta: EventMeta,
        chat_id: ChatId,
        user_id: UserId,
        reporter_id: UserId,
    },
}

impl AuditEvent {
    pub fn meta(&self) -> &EventMeta {
        match self {
            Self::SessionOpened { meta, .. }
            | Self::DepositCaptured { meta, .. }
            | Self::MessageBilled { meta, .. }
            | Self::RefundIssued { meta, .. }
            | Self::SessionClosed { meta, .. }
            | Self::AccountFlagged { meta, .. } => meta,
        }
    }

    pub fn chat_id(&self) -> &ChatId {
        match self {
            Self::SessionOpened { chat_id, .. }
            | Self::DepositCaptured { chat_id, .. }
            | Self::MessageBilled { chat_id, .. }
            | Self::RefundIssued { chat_id, .. }
            | Self::SessionClosed { chat_id, .. }
            | Self::AccountFlagged { chat_id, .. } => chat_id,
        }
    }

    /// Stable name, matching the serialized `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionOpened { .. } => "session_opened",
            Self::DepositCaptured { .. } => "deposit_captured",
            Self::MessageBilled { .. } => "message_billed",
            Self::RefundIssued { .. } => "refund_issued",
            Self::SessionClosed { .. } => "session_closed",
            Self::AccountFlagged { .. } => "account_flagged",
        }
    }

    /// The user whose wallet or account the event concerns.
    pub fn subject(&self) -> Option<&UserId> {
        match self {
            Self::SessionOpened { payer_id, .. }
            | Self::DepositCaptured { payer_id, .. }
            | Self::RefundIssued { payer_id, .. } => Some(payer_id),
            Self::MessageBilled { earner_id, .. } => Some(earner_id),
            Self::AccountFlagged { user_id, .. } => Some(user_id),
            Self::SessionClosed { closed_by, .. } => closed_by.as_ref(),
        }
    }

    /// Currency moved by the event, zero for pure lifecycle records.
    pub fn amount(&self) -> u64 {
        match self {
            Self::DepositCaptured { amount, .. } | Self::RefundIssued { amount, .. } => *amount,
            Self::MessageBilled { tokens, .. } => *tokens,
            _ => 0,
        }
    }
}

/// Sink the engine writes audit events to.
///
/// Recording never fails from the caller's point of view; sinks that can
/// lose events account for it themselves.
pub trait AuditLog: Send + Sync {
    fn record(&self, event: AuditEvent);
}
