//! Tolerant decoding of JSON replies.
//!
//! A strict decode is always tried first. Only when it fails is the reply
//! repaired (markdown fences, surrounding prose, trailing commas) and decoded
//! again into the same typed shape, so a repaired reply is still checked
//! against the expected schema before anyone uses it.

use crate::error::{Result, TransubError};
use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::LazyLock;

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("Invalid regex"));

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("Invalid regex"));

pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let strict_err = match serde_json::from_str::<T>(raw.trim()) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let repaired = repair(raw);
    let value: serde_json::Value = serde_json::from_str(&repaired).map_err(|e| {
        TransubError::InvalidResponse(format!(
            "not JSON ({strict_err}); repair failed: {e}; reply: {}",
            preview(raw)
        ))
    })?;

    serde_json::from_value(value)
        .map_err(|e| TransubError::InvalidResponse(format!("unexpected shape: {e}")))
}

/// Best-effort cleanup of a model reply into something JSON-shaped.
pub fn repair(raw: &str) -> String {
    let mut text = raw.trim().to_string();

    if let Some(caps) = FENCE.captures(&text) {
        text = caps[1].to_string();
    }

    text = extract_outer(&text).to_string();
    TRAILING_COMMA.replace_all(&text, "$1").into_owned()
}

/// Slice from the first opening brace/bracket to the last matching closer.
fn extract_outer(text: &str) -> &str {
    let open = text.find(['{', '[']);
    let Some(open) = open else {
        return text;
    };
    let closer = if text[open..].starts_with('{') { '}' } else { ']' };
    match text.rfind(closer) {
        Some(close) if close > open => &text[open..=close],
        _ => &text[open..],
    }
}

fn preview(raw: &str) -> String {
    let mut s: String = raw.chars().take(200).collect();
    if raw.chars().count() > 200 {
        s.push_str("...");
    }
    s
}
