//! Property-based tests for the money paths.
//!
//! - every billed token leaves the bucket exactly once
//! - a paid chat never hands out more free messages than its allowance
//! - a mismatch close never refunds less than a manual close would

mod common;

use chat_state::{CloseReason, SessionState};
use chatpay_core::{MediaKind, MessageContent};
use chatpay_engine::refund_for;
use proptest::prelude::*;

use common::{user, words, Harness, EARNER, PAYER};

#[derive(Debug, Clone)]
enum Outgoing {
    Text(usize),
    Sticker,
}

fn arb_send() -> impl Strategy<Value = Outgoing> {
    prop_oneof![
        4 => (1usize..40).prop_map(Outgoing::Text),
        1 => Just(Outgoing::Sticker),
    ]
}

fn content(send: &Outgoing, i: usize) -> MessageContent {
    match send {
        Outgoing::Text(n) => MessageContent::text(words(*n, &format!("m{i}w"))),
        Outgoing::Sticker => MessageContent::media(MediaKind::Sticker),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn billed_tokens_match_bucket_consumption(sends in prop::collection::vec(arb_send(), 0..60)) {
        let h = Harness::new();
        let chat_id = h.funded_royal_chat("conserve");

        let mut billed = 0u64;
        for (i, send) in sends.iter().enumerate() {
            let outcome = h.send(&chat_id, EARNER, content(send, i));
            if outcome.allowed {
                billed += outcome.tokens_cost;
            } else {
                prop_assert_eq!(outcome.tokens_cost, 0);
            }
        }

        let session = h.engine.session(&chat_id).unwrap();
        let bucket = session.bucket.as_ref().unwrap();
        prop_assert_eq!(billed, bucket.total_tokens - bucket.remaining_tokens);
        prop_assert!(bucket.remaining_words >= bucket.remaining_tokens * u64::from(bucket.words_per_token));
        prop_assert_eq!(h.balance(EARNER), billed);
        prop_assert_eq!(h.balance(PAYER), 900);
    }

    #[test]
    fn free_messages_never_exceed_the_allowance(senders in prop::collection::vec(any::<bool>(), 0..40)) {
        let h = Harness::new();
        let chat_id = h.open_royal_chat("allowance");

        let mut free = 0u32;
        for (i, payer_sends) in senders.iter().enumerate() {
            let sender = if *payer_sends { PAYER } else { EARNER };
            let outcome = h.send(&chat_id, sender, format!("{sender} says {i}"));
            if outcome.allowed {
                prop_assert_eq!(outcome.tokens_cost, 0);
                free += 1;
            }
        }

        let session = h.engine.session(&chat_id).unwrap();
        prop_assert!(free <= 12);
        prop_assert_eq!(free, session.total_free_used());
        prop_assert!(session.free_used(&user(PAYER)) <= 6);
        prop_assert!(session.free_used(&user(EARNER)) <= 6);
        prop_assert!(matches!(
            session.state(),
            SessionState::FreeActive | SessionState::AwaitingPrepaid
        ));
    }

    #[test]
    fn mismatch_refund_covers_manual_refund(sizes in prop::collection::vec(1usize..30, 0..15)) {
        let h = Harness::new();
        let chat_id = h.funded_royal_chat("mismatch");
        for (i, n) in sizes.iter().enumerate() {
            h.send(&chat_id, EARNER, words(*n, &format!("s{i}w")));
        }

        let snapshot = h.engine.session(&chat_id).unwrap();
        let manual = refund_for(&snapshot, CloseReason::Manual);
        let refund = h
            .engine
            .handle_mismatch(&chat_id, &user(PAYER), &user(EARNER))
            .unwrap()
            .refund();

        prop_assert!(refund >= manual);
        prop_assert_eq!(refund, manual + snapshot.used_tokens() * 35 / 100);
        prop_assert_eq!(h.balance(PAYER), 900 + refund);
    }
}
