//! ChatSession - the persisted record of one monetized chat.

use std::collections::BTreeMap;

use chatpay_core::{ChatId, ChatRoles, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bucket::PrepaidBucket;
use crate::machine::{
    CloseReason, SessionEvent, SessionState, StateMachine, StateTransition, TransitionError,
};

/// A chat between two participants and its monetization state.
///
/// State changes only go through the methods below so that every change is
/// validated by the state machine and lands in its history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    pub chat_id: ChatId,
    pub participants: [UserId; 2],
    pub roles: ChatRoles,
    machine: StateMachine,
    free_messages_used: BTreeMap<UserId, u32>,
    /// Delivered messages, free and billed.
    pub message_count: u64,
    pub bucket: Option<PrepaidBucket>,
    /// Platform share captured at deposit time.
    pub platform_fee: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub first_paid_message_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub refund_amount: u64,
    pub close_reason: Option<CloseReason>,
}

impl ChatSession {
    /// Create a session in `FreeActive` with zeroed counters.
    pub fn new(chat_id: ChatId, participants: [UserId; 2], roles: ChatRoles, now: DateTime<Utc>) -> Self {
        let free_messages_used = participants.iter().map(|id| (id.clone(), 0)).collect();
        Self {
            chat_id,
            participants,
            roles,
            machine: StateMachine::new(),
            free_messages_used,
            message_count: 0,
            bucket: None,
            platform_fee: 0,
            created_at: now,
            last_activity_at: now,
            first_paid_message_at: None,
            expires_at: None,
            closed_at: None,
            refund_amount: 0,
            close_reason: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn history(&self) -> &[StateTransition] {
        self.machine.history()
    }

    pub fn is_participant(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }

    /// The other participant, if `user` takes part in this chat.
    pub fn counterpart(&self, user: &UserId) -> Option<&UserId> {
        match &self.participants {
            [a, b] if a == user => Some(b),
            [a, b] if b == user => Some(a),
            _ => None,
        }
    }

    pub fn free_used(&self, user: &UserId) -> u32 {
        self.free_messages_used.get(user).copied().unwrap_or(0)
    }

    pub fn total_free_used(&self) -> u32 {
        self.free_messages_used.values().sum()
    }

    /// Both participants together have used `2 × freeMessageLimit`.
    pub fn free_allowance_exhausted(&self) -> bool {
        allowance_exhausted(&self.roles, self.total_free_used())
    }

    /// Consume one free message for `user` if their personal allowance permits.
    pub fn try_use_free_message(&mut self, user: &UserId) -> bool {
        if !self.is_participant(user) {
            return false;
        }
        let used = self.free_messages_used.entry(user.clone()).or_insert(0);
        if !self.roles.free_message_limit.allows(*used) {
            return false;
        }
        *used += 1;
        true
    }

    /// Move a paid chat whose free allowance is spent to `AwaitingPrepaid`.
    pub fn exhaust_free_allowance(&mut self, now: DateTime<Utc>) -> Result<StateTransition, TransitionError> {
        if self.roles.is_free() {
            return Err(TransitionError::InvalidTransition {
                from: self.state(),
                event: SessionEvent::FreeAllowanceExhausted.to_string(),
            });
        }
        self.machine.handle_event(SessionEvent::FreeAllowanceExhausted, now)
    }

    /// Attach a funded bucket and enter `PaidActive`.
    pub fn fund(
        &mut self,
        bucket: PrepaidBucket,
        platform_fee: u64,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<StateTransition, TransitionError> {
        let transition = self.machine.handle_event(SessionEvent::DepositConfirmed, now)?;
        self.bucket = Some(bucket);
        self.platform_fee = platform_fee;
        self.expires_at = Some(expires_at);
        Ok(transition)
    }

    /// Deduct a billed message from the bucket. Returns `false` and changes
    /// nothing if there is no bucket or it cannot cover `tokens`.
    pub fn bill(&mut self, tokens: u64, words: u64, now: DateTime<Utc>) -> bool {
        let Some(bucket) = self.bucket.as_mut() else {
            return false;
        };
        if !bucket.consume(tokens, words) {
            return false;
        }
        self.first_paid_message_at.get_or_insert(now);
        true
    }

    /// Count a delivered message and refresh activity.
    pub fn record_delivery(&mut self, now: DateTime<Utc>) {
        self.message_count += 1;
        self.last_activity_at = now;
    }

    /// Tokens still escrowed in the bucket.
    pub fn remaining_tokens(&self) -> u64 {
        self.bucket.as_ref().map_or(0, |b| b.remaining_tokens)
    }

    /// Tokens already billed out of the bucket.
    pub fn used_tokens(&self) -> u64 {
        self.bucket.as_ref().map_or(0, PrepaidBucket::used_tokens)
    }

    /// Enter a terminal state, recording the refund that was paid out.
    pub fn terminate(
        &mut self,
        reason: CloseReason,
        refund: u64,
        now: DateTime<Utc>,
    ) -> Result<StateTransition, TransitionError> {
        let transition = self.machine.handle_event(SessionEvent::Closed { reason }, now)?;
        self.closed_at = Some(now);
        self.close_reason = Some(reason);
        self.refund_amount = refund;
        Ok(transition)
    }

    /// Swap in freshly resolved roles while the chat is still in its free phase.
    ///
    /// Free-message counters are kept; if the new roles are paid and the
    /// allowance is already spent the chat moves to `AwaitingPrepaid`.
    pub fn replace_roles(
        &mut self,
        roles: ChatRoles,
        now: DateTime<Utc>,
    ) -> Result<StateTransition, TransitionError> {
        let event = SessionEvent::RolesRefreshed {
            still_free: roles.is_free(),
            allowance_exhausted: allowance_exhausted(&roles, self.total_free_used()),
        };
        let transition = self.machine.handle_event(event, now)?;
        self.roles = roles;
        Ok(transition)
    }
}

fn allowance_exhausted(roles: &ChatRoles, used: u32) -> bool {
    roles
        .free_message_limit
        .aggregate()
        .is_some_and(|allowance| used >= allowance)
}
