//! Response cleanup and tolerant JSON parsing
//!
//! Provider output is parsed with case-insensitive property names: every
//! object key is folded to lower case with `_` and `-` removed before
//! deserialization, so `summaryMessage`, `SummaryMessage`, `summary_message`
//! and `SUMMARY-MESSAGE` all land on the same field. Wire structs therefore
//! name multi-word fields in their folded form.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n?(.*?)\n?\s*```\s*$").unwrap());

/// Outcome of parsing one textual candidate
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedText<T> {
    Parsed(T),
    /// Blank text or a bare JSON `null`
    Empty,
    Malformed(String),
}

/// Strip a surrounding markdown code fence, if any
pub fn strip_code_fence(text: &str) -> &str {
    match CODE_FENCE.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => text.trim(),
    }
}

/// Canonical form of a property name
pub fn fold_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Recursively fold every object key in `value`
pub fn fold_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut folded = Map::with_capacity(map.len());
            for (key, inner) in map {
                folded.insert(fold_key(&key), fold_keys(inner));
            }
            Value::Object(folded)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(fold_keys).collect()),
        other => other,
    }
}

/// Parse provider text into `T` with folded keys
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> ParsedText<T> {
    let cleaned = strip_code_fence(text);
    if cleaned.is_empty() {
        return ParsedText::Empty;
    }

    let value: Value = match serde_json::from_str(cleaned) {
        Ok(value) => value,
        Err(e) => return ParsedText::Malformed(format!("invalid JSON: {}", e)),
    };
    if value.is_null() {
        return ParsedText::Empty;
    }

    match serde_json::from_value(fold_keys(value)) {
        Ok(parsed) => ParsedText::Parsed(parsed),
        Err(e) => ParsedText::Malformed(format!("unexpected shape: {}", e)),
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}
