//! `@username` extraction for comment bodies.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([A-Za-z0-9_]+)").expect("mention pattern is valid"));

/// Returns the distinct, lowercased usernames mentioned in `text`, without the leading `@`.
pub fn parse_mentions(text: &str) -> BTreeSet<String> {
    MENTION
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
        .collect()
}
