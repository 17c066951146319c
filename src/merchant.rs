use std::sync::OnceLock;

use regex::Regex;

pub const MAX_MERCHANT_LEN: usize = 50;

fn date_token() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:\d{1,2}/\d{1,2}/\d{4}|\d{1,2}-\d{1,2}-\d{4})\b").expect("valid date regex")
    })
}

fn noise_words() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:PURCHASE|PAYMENT|DEBIT|CREDIT)\b").expect("valid noise regex"))
}

/// Derive a grouping key from a free-text bank description. The key is the
/// first three meaningful words, so `"PURCHASE 12/01/2024 STARBUCKS #123 SEATTLE WA"`
/// and `"STARBUCKS #123 SEATTLE"` land in the same group.
pub fn extract_merchant(description: &str) -> String {
    let upper = description.to_uppercase();
    let without_dates = date_token().replace_all(&upper, " ");
    let cleaned = noise_words().replace_all(&without_dates, " ");
    let key = cleaned
        .trim()
        .split_whitespace()
        .take(3)
        .collect::<Vec<_>>()
        .join(" ");
    key.chars().take(MAX_MERCHANT_LEN).collect()
}
