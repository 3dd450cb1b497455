//! Lenient structured-value parsing for tool-call bodies.
//!
//! Ladder of strategies, each tried in order: strict `serde_json`,
//! single-quote normalization, trailing-brace repair. Known hallucinated
//! sub-tags are stripped before any parse attempt. Every step is total;
//! exhausting the ladder yields `None`, never an error.

use serde_json::Value;

/// Sub-tags some models invent inside tool-call JSON.
const NOISE_TOKENS: [&str; 4] = ["<arg_value>", "</arg_value>", "<tool_code>", "</tool_code>"];

/// Parse a raw tool-call body into a JSON value, tolerating common model
/// malformations. Pure and deterministic.
pub(crate) fn parse_lenient(raw: &str) -> Option<Value> {
    let cleaned = strip_noise(raw);
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }

    if let Ok(v) = serde_json::from_str::<Value>(cleaned) {
        return Some(v);
    }

    let requoted = normalize_quotes(cleaned);
    if let Ok(v) = serde_json::from_str::<Value>(&requoted) {
        return Some(v);
    }

    // Truncated output most often loses the final brace. The tail may
    // already end in an inner `}`, so the append is unconditional.
    for candidate in [cleaned, requoted.as_str()] {
        let mut fixed = candidate.trim_end().to_string();
        fixed.push('}');
        if let Ok(v) = serde_json::from_str::<Value>(&fixed) {
            return Some(v);
        }
    }

    None
}

fn strip_noise(s: &str) -> String {
    let mut out = s.to_string();
    for token in NOISE_TOKENS {
        out = out.replace(token, "");
    }
    out
}

/// Rewrite single-quoted strings as double-quoted ones.
///
/// Quote characters inside properly double-quoted strings are left alone;
/// apostrophes inside single-quoted strings are beyond repair and simply
/// fail the subsequent parse attempt.
fn normalize_quotes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_double = false;
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_double => {
                escaped = true;
                out.push(c);
            }
            '"' => {
                in_double = !in_double;
                out.push(c);
            }
            '\'' if !in_double => out.push('"'),
            _ => out.push(c),
        }
    }
    out
}
