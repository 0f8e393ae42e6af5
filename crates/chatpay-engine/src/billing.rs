//! Per-message gate: free allowance, deposit gating and word-metered billing.

use std::sync::Arc;

use chat_state::{ChatSession, SessionState};
use chatpay_audit::{AuditEvent, AuditLog, EventMeta};
use chatpay_core::{count_billable_words, ChatId, MessageContent, UserId};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::abuse::AbuseGuard;
use crate::clock::Clock;
use crate::error::{EngineError, MessageOutcome, Rejection, Result};
use crate::ledger::{op_id, WalletLedger};
use crate::store::SessionStore;

/// Token and word cost of a billed message.
///
/// Media costs one token and no words. Text costs
/// `max(1, ceil(words / words_per_token))` tokens.
pub fn message_cost(content: &MessageContent, words_per_token: u32) -> (u64, u64) {
    match content.as_text() {
        None => (1, 0),
        Some(text) => {
            let words = u64::from(count_billable_words(text));
            let tokens = words.div_ceil(u64::from(words_per_token.max(1))).max(1);
            (tokens, words)
        }
    }
}

pub struct BillingProcessor {
    sessions: Arc<dyn SessionStore>,
    ledger: Arc<dyn WalletLedger>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
    abuse: AbuseGuard,
}

impl BillingProcessor {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        ledger: Arc<dyn WalletLedger>,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
        abuse: AbuseGuard,
    ) -> Self {
        Self {
            sessions,
            ledger,
            audit,
            clock,
            abuse,
        }
    }

    /// Decide whether `sender` may deliver `content` into `chat_id`.
    ///
    /// Rejections come back inside the outcome. An `Err` means a precondition
    /// failed or a backend was unavailable, and nothing was committed.
    pub fn process_message(
        &self,
        chat_id: &ChatId,
        sender: &UserId,
        content: &MessageContent,
    ) -> Result<MessageOutcome> {
        let now = self.clock.now();

        let text = content.as_text();
        if let Some(text) = text {
            if !self.abuse.allows(sender, text, now) {
                info!(chat_id = %chat_id, sender = %sender, "message rejected: abuse detected");
                return Ok(MessageOutcome::rejected(Rejection::AbuseDetected));
            }
        }

        let (outcome, billed) = self
            .sessions
            .with_session_lock(chat_id, |session| self.gate(session, sender, content, now))?;

        match outcome.reason {
            Some(reason) => {
                info!(chat_id = %chat_id, sender = %sender, %reason, "message rejected")
            }
            None => {
                debug!(
                    chat_id = %chat_id,
                    sender = %sender,
                    tokens = outcome.tokens_cost,
                    "message delivered"
                );
                if let Some(text) = text {
                    self.abuse.record(sender, text, now);
                }
            }
        }
        if let Some(event) = billed {
            self.audit.record(event);
        }
        Ok(outcome)
    }

    fn gate(
        &self,
        session: &mut ChatSession,
        sender: &UserId,
        content: &MessageContent,
        now: DateTime<Utc>,
    ) -> Result<(MessageOutcome, Option<AuditEvent>)> {
        if !session.is_participant(sender) {
            return Err(EngineError::NotParticipant {
                chat_id: session.chat_id.clone(),
                user: sender.clone(),
            });
        }

        let state = session.state();
        if let Some(rejection) = Rejection::for_terminal(state) {
            return Ok((MessageOutcome::rejected(rejection), None));
        }
        if state == SessionState::AwaitingPrepaid {
            return Ok((MessageOutcome::rejected(Rejection::DepositRequired), None));
        }

        // Low-popularity chats never bill anything, media included.
        if session.roles.is_free() {
            if content.is_text() {
                session.try_use_free_message(sender);
            }
            session.record_delivery(now);
            return Ok((MessageOutcome::delivered(0), None));
        }

        if content.is_text() && session.try_use_free_message(sender) {
            session.record_delivery(now);
            return Ok((MessageOutcome::delivered(0), None));
        }

        if state == SessionState::FreeActive {
            if session.free_allowance_exhausted() {
                session.exhaust_free_allowance(now)?;
                info!(chat_id = %session.chat_id, "free allowance exhausted, awaiting deposit");
            }
            return Ok((MessageOutcome::rejected(Rejection::DepositRequired), None));
        }

        // PaidActive from here on.
        if session.roles.platform_is_earner() || session.roles.is_payer(sender) {
            session.record_delivery(now);
            return Ok((MessageOutcome::delivered(0), None));
        }

        self.bill(session, sender, content, now)
    }

    fn bill(
        &self,
        session: &mut ChatSession,
        earner: &UserId,
        content: &MessageContent,
        now: DateTime<Utc>,
    ) -> Result<(MessageOutcome, Option<AuditEvent>)> {
        let (tokens, words) = message_cost(content, session.roles.words_per_token);
        let remaining = session.remaining_tokens();
        if remaining < tokens {
            return Ok((
                MessageOutcome::rejected(Rejection::InsufficientBalance {
                    required: tokens,
                    remaining,
                }),
                None,
            ));
        }

        let op = op_id::bill(&session.chat_id, session.message_count + 1);
        if !session.bill(tokens, words, now) {
            return Err(EngineError::Storage(format!(
                "paid session {} has no prepaid bucket",
                session.chat_id
            )));
        }
        session.record_delivery(now);
        self.ledger.credit(&op, earner, tokens)?;

        let event = AuditEvent::MessageBilled {
            meta: EventMeta::at(now),
            chat_id: session.chat_id.clone(),
            earner_id: earner.clone(),
            tokens,
            words,
        };
        Ok((MessageOutcome::delivered(tokens), Some(event)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatpay_core::MediaKind;

    #[test]
    fn text_cost_rounds_up() {
        let text = MessageContent::text("one two three four five six seven eight");
        assert_eq!(message_cost(&text, 7), (2, 8));
        assert_eq!(message_cost(&text, 11), (1, 8));
    }

    #[test]
    fn empty_text_costs_one_token() {
        assert_eq!(message_cost(&MessageContent::text("🙂 !!"), 11), (1, 0));
    }

    #[test]
    fn media_costs_one_token() {
        assert_eq!(message_cost(&MessageContent::media(MediaKind::Video), 7), (1, 0));
    }

    #[test]
    fn twenty_one_words_at_seven_per_token() {
        let text = MessageContent::text(vec!["word"; 21].join(" "));
        assert_eq!(message_cost(&text, 7), (3, 21));
    }
}
