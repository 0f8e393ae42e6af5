//! Emergency close after a failed identity check.

use std::sync::Arc;

use chat_state::CloseReason;
use chatpay_audit::{AuditEvent, AuditLog, EventMeta};
use chatpay_core::{ChatId, UserId};
use tracing::warn;

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::escrow::{CloseOutcome, EscrowManager};
use crate::store::SessionStore;

pub struct SafetyCloser {
    sessions: Arc<dyn SessionStore>,
    escrow: Arc<EscrowManager>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
}

impl SafetyCloser {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        escrow: Arc<EscrowManager>,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions,
            escrow,
            audit,
            clock,
        }
    }

    /// Close `chat_id` with the mismatch refund and flag `suspect` for review.
    ///
    /// The suspect is flagged even when the chat was already terminal.
    pub fn handle_mismatch(
        &self,
        chat_id: &ChatId,
        reporter: &UserId,
        suspect: &UserId,
    ) -> Result<CloseOutcome> {
        let now = self.clock.now();
        let (outcome, events) = self.sessions.with_session_lock(chat_id, |session| {
            if !session.is_participant(suspect) {
                return Err(EngineError::NotParticipant {
                    chat_id: chat_id.clone(),
                    user: suspect.clone(),
                });
            }
            self.escrow
                .settle(session, Some(reporter), CloseReason::MismatchSelfie, now)
        })?;
        self.escrow.publish(events);

        warn!(
            chat_id = %chat_id,
            suspect = %suspect,
            reporter = %reporter,
            refund = outcome.refund(),
            "selfie mismatch, account flagged for review"
        );
        self.audit.record(AuditEvent::AccountFlagged {
            meta: EventMeta::at(now),
            chat_id: chat_id.clone(),
            user_id: suspect.clone(),
            reporter_id: reporter.clone(),
        });
        Ok(outcome)
    }
}
