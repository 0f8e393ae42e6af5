//! Backend failures must leave sessions and balances exactly as they were.

mod common;

use std::sync::Arc;

use chat_state::{CloseReason, SessionState};
use chatpay_core::{ChatId, ConfigError, EngineConfig, MediaKind, MessageContent, ParticipantContext, UserId};
use chatpay_engine::{EngineError, LedgerError, MonetizationEngine, ProfileError, ProfileStore};
use chrono::Duration;

use common::{user, words, Harness, EARNER, PAYER};

fn unavailable(err: &EngineError) -> bool {
    matches!(err, EngineError::Ledger(LedgerError::Unavailable(_)))
}

#[test]
fn failed_debit_leaves_the_chat_awaiting_deposit() {
    let (h, flaky) = Harness::with_flaky_ledger();
    let chat_id = h.open_royal_chat("debit-down");
    h.spend_free_allowance(&chat_id, 6);
    h.send(&chat_id, PAYER, "flip it");

    flaky.fail_ops("deposit:");
    let err = h.engine.deposit(&chat_id, &user(PAYER)).unwrap_err();
    assert!(unavailable(&err), "unexpected error {err:?}");

    let session = h.engine.session(&chat_id).unwrap();
    assert_eq!(session.state(), SessionState::AwaitingPrepaid);
    assert!(session.bucket.is_none());
    assert!(session.expires_at.is_none());
    assert_eq!(h.balance(PAYER), 1_000);
    assert!(!h.audit_kinds(&chat_id).contains(&"deposit_captured"));

    flaky.heal();
    h.engine.deposit(&chat_id, &user(PAYER)).unwrap();
    assert_eq!(h.engine.session(&chat_id).unwrap().state(), SessionState::PaidActive);
    assert_eq!(h.balance(PAYER), 900);
}

#[test]
fn failed_credit_bills_nothing() {
    let (h, flaky) = Harness::with_flaky_ledger();
    let chat_id = h.funded_royal_chat("credit-down");
    let before = h.engine.session(&chat_id).unwrap();

    flaky.fail_ops("bill:");
    let text = MessageContent::text(words(14, "lost"));
    let err = h
        .engine
        .process_message(&chat_id, &user(EARNER), &text)
        .unwrap_err();
    assert!(unavailable(&err), "unexpected error {err:?}");

    let after = h.engine.session(&chat_id).unwrap();
    assert_eq!(after.remaining_tokens(), 65);
    assert_eq!(after.message_count, before.message_count);
    assert_eq!(after.last_activity_at, before.last_activity_at);
    assert!(after.first_paid_message_at.is_none());
    assert_eq!(h.balance(EARNER), 0);
    assert!(!h.audit_kinds(&chat_id).contains(&"message_billed"));

    flaky.heal();
    let outcome = h.send(&chat_id, EARNER, text);
    assert!(outcome.allowed);
    assert_eq!(outcome.tokens_cost, 2);
    assert_eq!(h.balance(EARNER), 2);
}

#[test]
fn failed_refund_keeps_the_session_open() {
    let (h, flaky) = Harness::with_flaky_ledger();
    let chat_id = h.funded_royal_chat("refund-down");
    h.send(&chat_id, EARNER, MessageContent::media(MediaKind::Image));

    flaky.fail_ops("refund:");
    let err = h
        .engine
        .close_session(&chat_id, &user(PAYER), CloseReason::Manual)
        .unwrap_err();
    assert!(unavailable(&err), "unexpected error {err:?}");

    let session = h.engine.session(&chat_id).unwrap();
    assert_eq!(session.state(), SessionState::PaidActive);
    assert!(session.close_reason.is_none());
    assert_eq!(session.refund_amount, 0);
    assert_eq!(h.balance(PAYER), 900);
    assert!(!h.audit_kinds(&chat_id).contains(&"session_closed"));

    flaky.heal();
    let refund = h
        .engine
        .close_session(&chat_id, &user(PAYER), CloseReason::Manual)
        .unwrap()
        .refund();
    assert_eq!(refund, 64);
    assert_eq!(h.balance(PAYER), 964);
}

#[test]
fn failed_mismatch_refund_flags_nobody() {
    let (h, flaky) = Harness::with_flaky_ledger();
    let chat_id = h.funded_royal_chat("mismatch-down");

    flaky.fail_ops("refund:");
    let err = h
        .engine
        .handle_mismatch(&chat_id, &user(PAYER), &user(EARNER))
        .unwrap_err();
    assert!(unavailable(&err), "unexpected error {err:?}");
    assert_eq!(h.engine.session(&chat_id).unwrap().state(), SessionState::PaidActive);
    assert!(!h.audit_kinds(&chat_id).contains(&"account_flagged"));
}

#[test]
fn sweep_isolates_a_failing_refund() {
    let (h, flaky) = Harness::with_flaky_ledger();
    let healthy = h.funded_royal_chat("sweep-ok");
    let stuck = h.funded_royal_chat("sweep-stuck");

    flaky.fail_ops(&format!("refund:{stuck}"));
    h.clock.advance(Duration::hours(73));
    let report = h.engine.sweep_expired().unwrap();

    assert_eq!(report.scanned, 2);
    assert_eq!(report.expired.len(), 1);
    assert_eq!(report.expired[0].chat_id, healthy);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].chat_id, stuck);
    assert!(report.failures[0].error.contains("unavailable"));

    assert_eq!(h.engine.session(&healthy).unwrap().state(), SessionState::Expired);
    assert_eq!(h.engine.session(&stuck).unwrap().state(), SessionState::PaidActive);
    assert_eq!(h.balance(PAYER), 800 + 65);

    flaky.heal();
    let retry = h.engine.sweep_expired().unwrap();
    assert_eq!(retry.scanned, 1);
    assert_eq!(retry.expired.len(), 1);
    assert!(retry.failures.is_empty());
    assert_eq!(h.balance(PAYER), 800 + 65 + 65);
}

struct OfflineDirectory;

impl ProfileStore for OfflineDirectory {
    fn participant_context(&self, _user: &UserId) -> Result<ParticipantContext, ProfileError> {
        Err(ProfileError::Unavailable("profile directory offline".to_string()))
    }
}

#[test]
fn profile_outage_opens_nothing() {
    let engine = MonetizationEngine::builder(EngineConfig::default())
        .profiles(Arc::new(OfflineDirectory))
        .build()
        .unwrap();
    let chat_id = ChatId::from("offline");

    let err = engine
        .open_chat(chat_id.clone(), &user(PAYER), &user(EARNER), &user(PAYER))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Profile(ProfileError::Unavailable(_))
    ));
    assert!(matches!(
        engine.session(&chat_id),
        Err(EngineError::SessionNotFound(_))
    ));
}

#[test]
fn builder_rejects_inverted_price_bounds() {
    let mut config = EngineConfig::default();
    config.pricing.min_price = 400;
    config.pricing.max_price = 200;
    let result = MonetizationEngine::builder(config).build();
    assert!(matches!(
        result,
        Err(EngineError::Config(ConfigError::Invalid(_)))
    ));
}
