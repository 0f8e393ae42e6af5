//! Deposit intake, bucket conversion and refunds.

use std::sync::Arc;

use chat_state::{ChatSession, CloseReason, PrepaidBucket, SessionState};
use chatpay_audit::{AuditEvent, AuditLog, EventMeta};
use chatpay_core::{ChatId, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::ledger::{op_id, WalletLedger};
use crate::store::SessionStore;

/// What a successful deposit put into escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DepositReceipt {
    pub escrow_amount: u64,
    pub platform_fee: u64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CloseOutcome {
    Closed { state: SessionState, refund: u64 },
    /// The session was already expired or closed; nothing changed.
    AlreadyTerminal { state: SessionState },
}

impl CloseOutcome {
    pub fn refund(&self) -> u64 {
        match self {
            Self::Closed { refund, .. } => *refund,
            Self::AlreadyTerminal { .. } => 0,
        }
    }

    pub fn state(&self) -> SessionState {
        match self {
            Self::Closed { state, .. } | Self::AlreadyTerminal { state } => *state,
        }
    }

    pub fn is_already_terminal(&self) -> bool {
        matches!(self, Self::AlreadyTerminal { .. })
    }
}

/// Amount returned to the payer when `session` closes for `reason`.
///
/// Unspent tokens always go back. A selfie mismatch also returns the
/// platform's share of what was already spent.
pub fn refund_for(session: &ChatSession, reason: CloseReason) -> u64 {
    let remaining = session.remaining_tokens();
    match reason {
        CloseReason::MismatchSelfie => {
            let forfeited =
                session.used_tokens() * u64::from(session.roles.platform_split_percent) / 100;
            remaining + forfeited
        }
        CloseReason::Manual | CloseReason::Expiration => remaining,
    }
}

pub struct EscrowManager {
    sessions: Arc<dyn SessionStore>,
    ledger: Arc<dyn WalletLedger>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
    paid_session: Duration,
}

impl EscrowManager {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        ledger: Arc<dyn WalletLedger>,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
        paid_session_hours: i64,
    ) -> Self {
        Self {
            sessions,
            ledger,
            audit,
            clock,
            paid_session: Duration::hours(paid_session_hours),
        }
    }

    /// Debit the payer the chat price and fund the prepaid bucket.
    pub fn deposit(&self, chat_id: &ChatId, payer: &UserId) -> Result<DepositReceipt> {
        let now = self.clock.now();

        let (receipt, price) = self.sessions.with_session_lock(chat_id, |session| {
            if !session.is_participant(payer) {
                return Err(EngineError::NotParticipant {
                    chat_id: chat_id.clone(),
                    user: payer.clone(),
                });
            }
            if !session.roles.is_payer(payer) {
                return Err(EngineError::NotPayer(payer.clone()));
            }
            if session.roles.is_free() {
                return Err(EngineError::FreeChat(chat_id.clone()));
            }
            if session.state() == SessionState::PaidActive {
                return Err(EngineError::AlreadyFunded(chat_id.clone()));
            }

            let price = session.roles.price;
            let balance = self.ledger.balance(payer)?;
            if balance < price {
                return Err(EngineError::InsufficientFunds { balance, price });
            }

            let platform_fee = session.roles.platform_fee();
            let escrow_amount = session.roles.escrow_amount();
            let expires_at = now + self.paid_session;
            let bucket = PrepaidBucket::new(escrow_amount, session.roles.words_per_token);
            session.fund(bucket, platform_fee, expires_at, now)?;

            self.ledger.debit(&op_id::deposit(chat_id), payer, price)?;

            Ok((
                DepositReceipt {
                    escrow_amount,
                    platform_fee,
                    expires_at,
                },
                price,
            ))
        })?;

        info!(
            chat_id = %chat_id,
            payer = %payer,
            escrow = receipt.escrow_amount,
            fee = receipt.platform_fee,
            "deposit captured"
        );
        self.audit.record(AuditEvent::DepositCaptured {
            meta: EventMeta::at(now),
            chat_id: chat_id.clone(),
            payer_id: payer.clone(),
            amount: price,
            escrow_amount: receipt.escrow_amount,
            platform_fee: receipt.platform_fee,
        });
        Ok(receipt)
    }

    /// Manual close by a participant; refunds the payer's unspent tokens.
    ///
    /// Expiration and mismatch closes go through the sweeper and the safety
    /// closer. Closing a session that is already terminal returns
    /// `CloseOutcome::AlreadyTerminal`.
    pub fn close(&self, chat_id: &ChatId, closed_by: &UserId) -> Result<CloseOutcome> {
        let now = self.clock.now();
        let (outcome, events) = self.sessions.with_session_lock(chat_id, |session| {
            self.settle(session, Some(closed_by), CloseReason::Manual, now)
        })?;
        self.publish(events);
        Ok(outcome)
    }

    /// Close `session` in place. Must run under the session lock; the
    /// returned events are published by the caller after commit.
    pub(crate) fn settle(
        &self,
        session: &mut ChatSession,
        closed_by: Option<&UserId>,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) -> Result<(CloseOutcome, Vec<AuditEvent>)> {
        let state = session.state();
        if state.is_terminal() {
            return Ok((CloseOutcome::AlreadyTerminal { state }, Vec::new()));
        }

        if reason == CloseReason::Manual {
            match closed_by {
                Some(user) if session.is_participant(user) => {}
                Some(user) => {
                    return Err(EngineError::NotParticipant {
                        chat_id: session.chat_id.clone(),
                        user: user.clone(),
                    })
                }
                None => {
                    return Err(EngineError::InvalidParticipants(
                        "manual close requires a participant".to_string(),
                    ))
                }
            }
        }

        let refund = refund_for(session, reason);
        let transition = session.terminate(reason, refund, now)?;
        let payer = session.roles.payer_id.clone();
        if refund > 0 {
            self.ledger
                .credit(&op_id::refund(&session.chat_id), &payer, refund)?;
        }

        info!(
            chat_id = %session.chat_id,
            %reason,
            refund,
            state = ?transition.to,
            "session closed"
        );

        let mut events = vec![AuditEvent::SessionClosed {
            meta: EventMeta::at(now),
            chat_id: session.chat_id.clone(),
            closed_by: closed_by.cloned(),
            reason,
            refund,
        }];
        if refund > 0 {
            events.push(AuditEvent::RefundIssued {
                meta: EventMeta::at(now),
                chat_id: session.chat_id.clone(),
                payer_id: payer,
                amount: refund,
                reason,
            });
        }

        Ok((
            CloseOutcome::Closed {
                state: transition.to,
                refund,
            },
            events,
        ))
    }

    pub(crate) fn publish(&self, events: Vec<AuditEvent>) {
        for event in events {
            self.audit.record(event);
        }
    }
}
