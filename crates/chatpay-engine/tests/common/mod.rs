#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chatpay_audit::MemoryAuditLog;
use chatpay_core::{ChatId, EngineConfig, Gender, MessageContent, ParticipantContext, Popularity, UserId};
use chatpay_engine::{
    InMemoryLedger, InMemoryProfileStore, LedgerError, ManualClock, MessageOutcome,
    MonetizationEngine, WalletLedger,
};
use chrono::{TimeZone, Utc};

pub const PAYER: &str = "marco";
pub const EARNER: &str = "freya";

pub struct Harness {
    pub engine: MonetizationEngine,
    pub ledger: Arc<InMemoryLedger>,
    pub profiles: Arc<InMemoryProfileStore>,
    pub audit: Arc<MemoryAuditLog>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::wired(|ledger| ledger)
    }

    /// Harness whose engine writes through a [`FlakyLedger`]. Balances are
    /// still read from `Harness::ledger`.
    pub fn with_flaky_ledger() -> (Self, Arc<FlakyLedger>) {
        let mut flaky = None;
        let h = Self::wired(|ledger| {
            let wrapped = Arc::new(FlakyLedger::new(ledger));
            flaky = Some(wrapped.clone());
            wrapped
        });
        (h, flaky.unwrap())
    }

    fn wired(wrap: impl FnOnce(Arc<InMemoryLedger>) -> Arc<dyn WalletLedger>) -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let profiles = Arc::new(InMemoryProfileStore::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));

        let engine = MonetizationEngine::builder(EngineConfig::default())
            .ledger(wrap(ledger.clone()))
            .profiles(profiles.clone())
            .audit(audit.clone())
            .clock(clock.clone())
            .build()
            .unwrap();

        profiles.upsert(ParticipantContext::new(PAYER, Gender::Male));
        profiles.upsert(
            ParticipantContext::new(EARNER, Gender::Female)
                .with_earn_mode(true)
                .with_royal_member(true),
        );
        ledger.set_balance(PAYER, 1_000);

        Self {
            engine,
            ledger,
            profiles,
            audit,
            clock,
        }
    }

    /// Male payer, royal female earner: 7 words/token, 6 free messages each.
    pub fn open_royal_chat(&self, chat: &str) -> ChatId {
        let chat_id = ChatId::from(chat);
        self.engine
            .open_chat(chat_id.clone(), &user(PAYER), &user(EARNER), &user(PAYER))
            .unwrap();
        chat_id
    }

    /// Low-popularity male pair: the chat resolves to FREE_LP.
    pub fn open_free_chat(&self, chat: &str) -> ChatId {
        self.profiles.upsert(
            ParticipantContext::new("leo", Gender::Male).with_popularity(Popularity::Low),
        );
        self.profiles
            .upsert(ParticipantContext::new("max", Gender::Male));
        let chat_id = ChatId::from(chat);
        self.engine
            .open_chat(chat_id.clone(), &user("leo"), &user("max"), &user("leo"))
            .unwrap();
        chat_id
    }

    pub fn send(&self, chat_id: &ChatId, sender: &str, content: impl Into<MessageContent>) -> MessageOutcome {
        self.engine
            .process_message(chat_id, &user(sender), &content.into())
            .unwrap()
    }

    /// Spend both participants' free allowance with distinct texts.
    pub fn spend_free_allowance(&self, chat_id: &ChatId, per_user: u32) {
        for i in 0..per_user {
            for sender in [PAYER, EARNER] {
                let outcome = self.send(chat_id, sender, format!("{sender} {chat_id} free {i}"));
                assert!(outcome.allowed, "free message {i} from {sender} rejected");
                assert_eq!(outcome.tokens_cost, 0);
            }
        }
    }

    /// Open, spend the free allowance, and fund a royal chat.
    pub fn funded_royal_chat(&self, chat: &str) -> ChatId {
        let chat_id = self.open_royal_chat(chat);
        self.spend_free_allowance(&chat_id, 6);
        self.engine.deposit(&chat_id, &user(PAYER)).unwrap();
        chat_id
    }

    pub fn balance(&self, who: &str) -> u64 {
        self.ledger.balance(&user(who)).unwrap()
    }

    pub fn audit_kinds(&self, chat_id: &ChatId) -> Vec<&'static str> {
        self.audit
            .events_for_chat(chat_id)
            .iter()
            .map(|event| event.kind())
            .collect()
    }
}

/// Ledger that refuses writes whose operation id starts with an armed prefix.
pub struct FlakyLedger {
    inner: Arc<InMemoryLedger>,
    failing: Mutex<Vec<String>>,
}

impl FlakyLedger {
    pub fn new(inner: Arc<InMemoryLedger>) -> Self {
        Self {
            inner,
            failing: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_ops(&self, prefix: &str) {
        self.failing.lock().unwrap().push(prefix.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn check(&self, op_id: &str) -> Result<(), LedgerError> {
        let failing = self.failing.lock().unwrap();
        if failing.iter().any(|prefix| op_id.starts_with(prefix.as_str())) {
            return Err(LedgerError::Unavailable(format!("wallet service timed out on {op_id}")));
        }
        Ok(())
    }
}

impl WalletLedger for FlakyLedger {
    fn balance(&self, user: &UserId) -> Result<u64, LedgerError> {
        self.inner.balance(user)
    }

    fn debit(&self, op_id: &str, user: &UserId, amount: u64) -> Result<(), LedgerError> {
        self.check(op_id)?;
        self.inner.debit(op_id, user, amount)
    }

    fn credit(&self, op_id: &str, user: &UserId, amount: u64) -> Result<(), LedgerError> {
        self.check(op_id)?;
        self.inner.credit(op_id, user, amount)
    }
}

pub fn user(id: &str) -> UserId {
    UserId::from(id)
}

/// `n` distinct billable words tagged with `tag`.
pub fn words(n: usize, tag: &str) -> String {
    (0..n)
        .map(|i| format!("{tag}{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}
