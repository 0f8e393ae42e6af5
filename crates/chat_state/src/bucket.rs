//! Prepaid bucket - escrowed allowance backing a paid session.
//!
//! Tokens track currency, words track the word allowance. Both are
//! decremented independently: token cost is rounded up per message while the
//! word ledger is exact, so the two drift apart over time. The drift is kept
//! as-is and never reconciled.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepaidBucket {
    pub total_tokens: u64,
    pub remaining_tokens: u64,
    pub words_per_token: u32,
    pub remaining_words: u64,
    pub used_words: u64,
}

impl PrepaidBucket {
    pub fn new(tokens: u64, words_per_token: u32) -> Self {
        Self {
            total_tokens: tokens,
            remaining_tokens: tokens,
            words_per_token,
            remaining_words: tokens.saturating_mul(u64::from(words_per_token)),
            used_words: 0,
        }
    }

    pub fn used_tokens(&self) -> u64 {
        self.total_tokens - self.remaining_tokens
    }

    pub fn can_afford(&self, tokens: u64) -> bool {
        self.remaining_tokens >= tokens
    }

    /// Deduct one billed message. Returns `false` and changes nothing when the
    /// bucket cannot cover `tokens`.
    pub fn consume(&mut self, tokens: u64, words: u64) -> bool {
        if !self.can_afford(tokens) {
            return false;
        }
        self.remaining_tokens -= tokens;
        self.remaining_words = self.remaining_words.saturating_sub(words);
        self.used_words += words;
        true
    }
}
