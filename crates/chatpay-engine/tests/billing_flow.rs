mod common;

use chat_state::SessionState;
use chatpay_core::{ChatId, ChatMode, MediaKind, MessageContent};
use chatpay_engine::{EngineError, MessageOutcome, Rejection};

use common::{user, words, Harness, EARNER, PAYER};

#[test]
fn royal_earner_scenario_meters_words() {
    let h = Harness::new();
    let chat_id = h.open_royal_chat("royal");

    let session = h.engine.session(&chat_id).unwrap();
    assert_eq!(session.roles.payer_id, user(PAYER));
    assert_eq!(session.roles.words_per_token, 7);
    assert_eq!(session.roles.price, 100);

    h.spend_free_allowance(&chat_id, 6);
    let receipt = h.engine.deposit(&chat_id, &user(PAYER)).unwrap();
    assert_eq!(receipt.escrow_amount, 65);
    assert_eq!(receipt.platform_fee, 35);

    let bucket = h.engine.session(&chat_id).unwrap().bucket.unwrap();
    assert_eq!((bucket.remaining_tokens, bucket.remaining_words), (65, 455));

    let outcome = h.send(&chat_id, EARNER, words(21, "w"));
    assert_eq!(outcome, MessageOutcome::delivered(3));

    let session = h.engine.session(&chat_id).unwrap();
    let bucket = session.bucket.as_ref().unwrap();
    assert_eq!(bucket.remaining_tokens, 62);
    assert_eq!(bucket.remaining_words, 434);
    assert_eq!(bucket.used_words, 21);
    assert!(session.first_paid_message_at.is_some());
    assert_eq!(h.balance(PAYER), 900);
    assert_eq!(h.balance(EARNER), 3);
    assert_eq!(h.audit.count_kind("message_billed"), 1);
}

#[test]
fn exhausting_the_allowance_flips_lazily() {
    let h = Harness::new();
    let chat_id = h.open_royal_chat("flip");
    h.spend_free_allowance(&chat_id, 6);
    assert_eq!(
        h.engine.session(&chat_id).unwrap().state(),
        SessionState::FreeActive
    );

    let outcome = h.send(&chat_id, PAYER, "one more please");
    assert_eq!(outcome, MessageOutcome::rejected(Rejection::DepositRequired));
    let session = h.engine.session(&chat_id).unwrap();
    assert_eq!(session.state(), SessionState::AwaitingPrepaid);
    assert_eq!(session.message_count, 12);

    let outcome = h.send(&chat_id, EARNER, "hello?");
    assert_eq!(outcome.reason, Some(Rejection::DepositRequired));
}

#[test]
fn spent_personal_allowance_waits_for_the_other_side() {
    let h = Harness::new();
    let chat_id = h.open_royal_chat("one-sided");

    for i in 0..6 {
        assert!(h.send(&chat_id, PAYER, format!("ping {i}")).allowed);
    }
    let outcome = h.send(&chat_id, PAYER, "ping again");
    assert_eq!(outcome.reason, Some(Rejection::DepositRequired));
    assert_eq!(
        h.engine.session(&chat_id).unwrap().state(),
        SessionState::FreeActive
    );

    assert_eq!(h.send(&chat_id, EARNER, "hi there"), MessageOutcome::delivered(0));
}

#[test]
fn media_is_never_free_in_a_paid_chat() {
    let h = Harness::new();
    let chat_id = h.open_royal_chat("media");

    let outcome = h.send(&chat_id, EARNER, MessageContent::media(MediaKind::Image));
    assert_eq!(outcome.reason, Some(Rejection::DepositRequired));
    assert_eq!(h.engine.session(&chat_id).unwrap().free_used(&user(EARNER)), 0);

    h.spend_free_allowance(&chat_id, 6);
    h.engine.deposit(&chat_id, &user(PAYER)).unwrap();
    let outcome = h.send(&chat_id, EARNER, MessageContent::media(MediaKind::Image));
    assert_eq!(outcome, MessageOutcome::delivered(1));
}

#[test]
fn payer_is_free_after_deposit() {
    let h = Harness::new();
    let chat_id = h.funded_royal_chat("payer-free");

    let outcome = h.send(&chat_id, PAYER, words(40, "p"));
    assert_eq!(outcome, MessageOutcome::delivered(0));
    assert_eq!(h.engine.session(&chat_id).unwrap().remaining_tokens(), 65);
}

#[test]
fn empty_bucket_rejects_without_partial_billing() {
    let h = Harness::new();
    let chat_id = h.funded_royal_chat("drain");

    for _ in 0..65 {
        let outcome = h.send(&chat_id, EARNER, MessageContent::media(MediaKind::Sticker));
        assert_eq!(outcome.tokens_cost, 1);
    }
    let before = h.engine.session(&chat_id).unwrap();

    let outcome = h.send(&chat_id, EARNER, words(3, "late"));
    assert_eq!(
        outcome.reason,
        Some(Rejection::InsufficientBalance {
            required: 1,
            remaining: 0
        })
    );

    let after = h.engine.session(&chat_id).unwrap();
    assert_eq!(after.message_count, before.message_count);
    assert_eq!(after.bucket, before.bucket);
    assert_eq!(h.balance(EARNER), 65);
}

#[test]
fn free_lp_chat_never_awaits_deposit() {
    let h = Harness::new();
    let chat_id = h.open_free_chat("lp");
    let session = h.engine.session(&chat_id).unwrap();
    assert_eq!(session.roles.mode, ChatMode::FreeLp);
    assert_eq!(session.roles.price, 0);

    for i in 0..200 {
        let sender = if i % 2 == 0 { "leo" } else { "max" };
        let content = if i % 7 == 0 {
            MessageContent::media(MediaKind::Video)
        } else {
            MessageContent::text(format!("lp message {i}"))
        };
        assert_eq!(h.send(&chat_id, sender, content), MessageOutcome::delivered(0));
    }

    let session = h.engine.session(&chat_id).unwrap();
    assert_eq!(session.state(), SessionState::FreeActive);
    assert_eq!(session.message_count, 200);
    assert!(history_never_awaited(&session));

    let err = h.engine.deposit(&chat_id, &user("leo")).unwrap_err();
    assert!(matches!(err, EngineError::FreeChat(_)));
}

fn history_never_awaited(session: &chat_state::ChatSession) -> bool {
    session
        .history()
        .iter()
        .all(|t| t.to != SessionState::AwaitingPrepaid)
}

#[test]
fn platform_earner_chat_is_not_metered() {
    let h = Harness::new();
    h.profiles.upsert(chatpay_core::ParticipantContext::new(
        "nina",
        chatpay_core::Gender::Female,
    ));
    let chat_id = ChatId::from("platform");
    h.engine
        .open_chat(chat_id.clone(), &user(PAYER), &user("nina"), &user("nina"))
        .unwrap();

    let session = h.engine.session(&chat_id).unwrap();
    assert!(session.roles.platform_is_earner());
    assert_eq!(session.roles.words_per_token, 11);

    for i in 0..10 {
        h.send(&chat_id, PAYER, format!("m {i}"));
        h.send(&chat_id, "nina", format!("n {i}"));
    }
    let receipt = h.engine.deposit(&chat_id, &user(PAYER)).unwrap();
    assert_eq!((receipt.platform_fee, receipt.escrow_amount), (100, 0));

    assert_eq!(h.send(&chat_id, "nina", words(30, "x")), MessageOutcome::delivered(0));
    assert_eq!(h.balance("nina"), 0);
}

#[test]
fn repeated_text_is_blocked_before_billing() {
    let h = Harness::new();
    let chat_id = h.open_royal_chat("abuse");

    assert!(h.send(&chat_id, PAYER, "Copy me").allowed);
    assert!(h.send(&chat_id, PAYER, "copy   ME").allowed);
    let outcome = h.send(&chat_id, PAYER, "COPY me");
    assert_eq!(outcome, MessageOutcome::rejected(Rejection::AbuseDetected));
    assert_eq!(h.engine.session(&chat_id).unwrap().free_used(&user(PAYER)), 2);
}

#[test]
fn undelivered_retries_do_not_count_as_repeats() {
    let h = Harness::new();
    let chat_id = h.open_royal_chat("retry");
    h.spend_free_allowance(&chat_id, 6);

    for _ in 0..3 {
        let outcome = h.send(&chat_id, PAYER, "are you there");
        assert_eq!(outcome.reason, Some(Rejection::DepositRequired));
    }

    h.engine.deposit(&chat_id, &user(PAYER)).unwrap();
    assert!(h.send(&chat_id, PAYER, "are you there").allowed);
    assert!(h.send(&chat_id, PAYER, "are you there").allowed);
    let third = h.send(&chat_id, PAYER, "are you there");
    assert_eq!(third.reason, Some(Rejection::AbuseDetected));
}

#[test]
fn outsiders_and_unknown_chats_are_precondition_failures() {
    let h = Harness::new();
    let chat_id = h.open_royal_chat("guarded");

    let err = h
        .engine
        .process_message(&chat_id, &user("mallory"), &MessageContent::text("hi"))
        .unwrap_err();
    assert!(matches!(err, EngineError::NotParticipant { .. }));

    let err = h
        .engine
        .process_message(&ChatId::from("missing"), &user(PAYER), &MessageContent::text("hi"))
        .unwrap_err();
    assert!(matches!(err, EngineError::SessionNotFound(_)));
}

#[test]
fn duplicate_chat_ids_are_rejected() {
    let h = Harness::new();
    h.open_royal_chat("dup");
    let err = h
        .engine
        .open_chat(ChatId::from("dup"), &user(PAYER), &user(EARNER), &user(PAYER))
        .unwrap_err();
    assert!(matches!(err, EngineError::SessionExists(_)));
}
