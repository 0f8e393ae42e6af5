//! Copy-paste abuse detection.
//!
//! Each sender gets an independent list of recent message fingerprints
//! (SHA-256 of the normalized text). A send is rejected when it would be
//! the `repeat_threshold`-th identical text inside the sliding window.
//! Only delivered messages are remembered. Idle senders are cleaned up periodically to keep memory bounded.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chatpay_core::{AbuseConfig, UserId};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Minimum interval between cleanup sweeps.
const CLEANUP_INTERVAL_SECS: i64 = 60;

/// Upper bound on the configurable window (one year).
const MAX_WINDOW_SECS: u64 = 31_536_000;

/// One remembered send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPasteRecord {
    pub hash: [u8; 32],
    pub recorded_at: DateTime<Utc>,
}

struct GuardInner {
    records: HashMap<UserId, VecDeque<CopyPasteRecord>>,
    last_cleanup: Option<DateTime<Utc>>,
}

pub struct AbuseGuard {
    inner: Mutex<GuardInner>,
    window: Duration,
    repeat_threshold: usize,
    max_records: usize,
}

impl AbuseGuard {
    pub fn new(config: &AbuseConfig) -> Self {
        Self {
            inner: Mutex::new(GuardInner {
                records: HashMap::new(),
                last_cleanup: None,
            }),
            window: Duration::seconds(config.window_secs.min(MAX_WINDOW_SECS) as i64),
            repeat_threshold: config.repeat_threshold.max(1) as usize,
            max_records: config.max_records_per_sender.max(1),
        }
    }

    /// Whether `sender` may send `text` at `now`.
    ///
    /// Returns `false` when the text would repeat an identical normalized
    /// text often enough inside the window. Nothing is remembered here; call
    /// [`Self::record`] once the message is actually delivered.
    pub fn allows(&self, sender: &UserId, text: &str, now: DateTime<Utc>) -> bool {
        let hash = fingerprint(text);
        let mut inner = self.lock();
        self.maybe_cleanup(&mut inner, now);

        let cutoff = now - self.window;
        let Some(history) = inner.records.get_mut(sender) else {
            return true;
        };
        while history.front().is_some_and(|r| r.recorded_at <= cutoff) {
            history.pop_front();
        }

        let repeats = history.iter().filter(|r| r.hash == hash).count();
        if repeats + 1 >= self.repeat_threshold {
            warn!(
                sender = %sender,
                repeats,
                fingerprint = %hex::encode(&hash[..8]),
                "copy-paste abuse detected"
            );
            return false;
        }
        true
    }

    /// Remember a delivered text.
    pub fn record(&self, sender: &UserId, text: &str, now: DateTime<Utc>) {
        let hash = fingerprint(text);
        let mut inner = self.lock();
        let history = inner.records.entry(sender.clone()).or_default();
        history.push_back(CopyPasteRecord {
            hash,
            recorded_at: now,
        });
        if history.len() > self.max_records {
            history.pop_front();
        }
    }

    /// Number of senders with live records.
    pub fn tracked_senders(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.records.len())
            .unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GuardInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn maybe_cleanup(&self, inner: &mut GuardInner, now: DateTime<Utc>) {
        let Some(last_cleanup) = inner.last_cleanup else {
            inner.last_cleanup = Some(now);
            return;
        };
        if now - last_cleanup < Duration::seconds(CLEANUP_INTERVAL_SECS) {
            return;
        }
        inner.last_cleanup = Some(now);

        let cutoff = now - self.window;
        let before = inner.records.len();
        inner
            .records
            .retain(|_, history| history.back().is_some_and(|r| r.recorded_at > cutoff));
        let removed = before - inner.records.len();
        if removed > 0 {
            debug!(removed, "dropped idle abuse records");
        }
    }
}

/// Lowercase, trim, and collapse internal whitespace.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn fingerprint(text: &str) -> [u8; 32] {
    Sha256::digest(normalize(text).as_bytes()).into()
}
