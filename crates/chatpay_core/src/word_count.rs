//! Billable word counting.
//!
//! A billable word is a whitespace-separated token that contains at least one
//! alphanumeric character once URLs are removed. Emoji, punctuation runs and
//! links therefore never cost anything.

use once_cell::sync::Lazy;
use regex::Regex;

static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:https?://|www\.)\S+").expect("URL pattern is valid"));

/// Count billable words in a text message.
pub fn count_billable_words(text: &str) -> u32 {
    let without_urls = URL_PATTERN.replace_all(text, " ");
    let count = without_urls
        .split_whitespace()
        .filter(|word| word.chars().any(char::is_alphanumeric))
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}
