//! Text-protocol codec — translates between free-form model output and
//! typed protocol elements.
//!
//! The model is untrusted and frequently non-conformant: it omits closing
//! delimiters, emits stray sub-tags, truncates mid-JSON. Every extraction
//! function here is total — it degrades to an empty or partial result
//! instead of failing, so a parse problem can never crash the loop. A turn
//! that yields neither an answer nor tool calls is simply a no-op
//! iteration for the loop to absorb.
//!
//! All functions are pure: re-parsing the same text yields identical
//! results.

mod lenient;

use deepquest_core::{ToolInvocation, ToolResult};
use tracing::debug;

use crate::lenient::parse_lenient;

/// Opening delimiter of a reasoning segment.
pub const THINK_START: &str = "<think>";
pub const THINK_END: &str = "</think>";

/// Opening delimiter of a tool invocation block.
pub const TOOL_CALL_START: &str = "<tool_call>";
pub const TOOL_CALL_END: &str = "</tool_call>";

/// Delimiters of the observation block the loop feeds back. Also used as
/// stop sequences so the model cannot fabricate its own observations.
pub const TOOL_RESPONSE_START: &str = "<tool_response>";
pub const TOOL_RESPONSE_END: &str = "</tool_response>";

/// Delimiters of a final answer.
pub const ANSWER_START: &str = "<answer>";
pub const ANSWER_END: &str = "</answer>";

/// Delimiters of a bare code block (implicit code-execution call).
pub const CODE_START: &str = "<code>";
pub const CODE_END: &str = "</code>";

/// The tool name an implicit `<code>` block is routed to.
pub const CODE_TOOL_NAME: &str = "PythonInterpreter";

/// The structured decomposition of one assistant turn.
///
/// Derived, never stored — recomputed from the raw message each turn.
#[derive(Debug, Clone, Default)]
pub struct ParsedTurn {
    /// Reasoning text preceding any action.
    pub thought: Option<String>,

    /// Tool invocations requested by the turn.
    pub invocations: Vec<ToolInvocation>,

    /// Final answer, when present. An explicit answer supersedes any tool
    /// calls also emitted in the same turn — those are discarded.
    pub final_answer: Option<String>,
}

impl ParsedTurn {
    /// Whether the turn requested no action at all.
    pub fn is_noop(&self) -> bool {
        self.invocations.is_empty() && self.final_answer.is_none()
    }
}

/// Decompose one assistant turn into its protocol elements.
pub fn parse_turn(text: &str) -> ParsedTurn {
    let thought = extract_thought(text);

    // Answer priority: an explicit answer terminates the run even when the
    // turn also contains tool-call blocks.
    if detect_final_answer(text) {
        return ParsedTurn {
            thought,
            invocations: Vec::new(),
            final_answer: Some(extract_final_answer(text)),
        };
    }

    ParsedTurn {
        thought,
        invocations: extract_tool_invocations(text),
        final_answer: None,
    }
}

/// True if an open answer delimiter is present. A closing delimiter is not
/// required — trailing truncation still counts as an answer attempt.
pub fn detect_final_answer(text: &str) -> bool {
    text.contains(ANSWER_START)
}

/// Extract the final answer text.
///
/// Prefers content between matched delimiters; an unmatched open tag
/// yields everything after it; no tag at all yields the trimmed text
/// verbatim, so the loop never stalls on malformed output.
pub fn extract_final_answer(text: &str) -> String {
    if let Some(start) = text.find(ANSWER_START) {
        let after = &text[start + ANSWER_START.len()..];
        if let Some(end) = after.find(ANSWER_END) {
            return after[..end].trim().to_string();
        }
        // Unmatched: take the tail after the last open tag.
        let tail = text.rsplit(ANSWER_START).next().unwrap_or(after);
        return tail.trim().to_string();
    }
    text.trim().to_string()
}

/// Extract the reasoning segment, if any.
///
/// For an unmatched `<think>` the tail is truncated before any tool-call
/// or answer delimiter so later content does not leak into the thought
/// channel.
pub fn extract_thought(text: &str) -> Option<String> {
    let start = text.find(THINK_START)?;
    let after = &text[start + THINK_START.len()..];

    let content = if let Some(end) = after.find(THINK_END) {
        after[..end].trim().to_string()
    } else {
        let mut tail = text.rsplit(THINK_START).next().unwrap_or(after);
        for tag in [TOOL_CALL_START, ANSWER_START] {
            if let Some(pos) = tail.find(tag) {
                tail = &tail[..pos];
            }
        }
        tail.trim().to_string()
    };

    if content.is_empty() { None } else { Some(content) }
}

/// Extract all tool invocations from a turn, in source order.
///
/// Matched `<tool_call>` blocks are parsed leniently (noise-token
/// stripping, single-quote normalization, trailing-brace repair). If no
/// block parses but an unmatched open tag exists, one best-effort repair
/// of the tail is attempted. A bare `<code>` block becomes an implicit
/// invocation of the code-execution tool unless an explicit one already
/// parsed in the same turn.
pub fn extract_tool_invocations(text: &str) -> Vec<ToolInvocation> {
    let mut invocations = Vec::new();

    let mut cursor = 0;
    while let Some(rel) = text[cursor..].find(TOOL_CALL_START) {
        let body_start = cursor + rel + TOOL_CALL_START.len();
        let Some(rel_end) = text[body_start..].find(TOOL_CALL_END) else {
            break;
        };
        let raw = text[body_start..body_start + rel_end].trim();
        cursor = body_start + rel_end + TOOL_CALL_END.len();

        match invocation_from_raw(raw) {
            Some(inv) => invocations.push(inv),
            None => debug!(snippet = %truncate_for_log(raw), "Unparsable tool-call block skipped"),
        }
    }

    // Unmatched open tag: usually a truncated stream. One repair attempt.
    if invocations.is_empty()
        && let Some(pos) = text.rfind(TOOL_CALL_START)
    {
        let tail = text[pos + TOOL_CALL_START.len()..].trim();
        if !tail.is_empty()
            && !tail.contains(TOOL_CALL_END)
            && let Some(inv) = invocation_from_raw(tail)
        {
            invocations.push(inv);
        }
    }

    // Implicit code invocation, only when not already requested explicitly.
    if let Some(code) = extract_code_block(text) {
        let has_explicit = invocations.iter().any(|inv| inv.name == CODE_TOOL_NAME);
        if !has_explicit && !code.is_empty() {
            invocations.push(ToolInvocation {
                name: CODE_TOOL_NAME.to_string(),
                arguments: serde_json::Value::String(code.clone()),
                raw_text: code,
            });
        }
    }

    invocations
}

/// Extract a matched `<code>…</code>` block.
fn extract_code_block(text: &str) -> Option<String> {
    let start = text.find(CODE_START)?;
    let after = &text[start + CODE_START.len()..];
    let end = after.find(CODE_END)?;
    Some(after[..end].trim().to_string())
}

/// Parse one raw tool-call body into an invocation.
fn invocation_from_raw(raw: &str) -> Option<ToolInvocation> {
    let value = parse_lenient(raw)?;
    let name = value.get("name")?.as_str()?.trim().to_string();
    if name.is_empty() {
        return None;
    }
    // Some models emit "parameters" instead of "arguments".
    let arguments = value
        .get("arguments")
        .or_else(|| value.get("parameters"))
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    Some(ToolInvocation {
        name,
        arguments,
        raw_text: raw.to_string(),
    })
}

/// Cut everything from the first `<tool_response>` onward.
///
/// A completion that contains this tag has started hallucinating its own
/// observation; the gateway truncates before the text is stored.
pub fn truncate_at_tool_response(text: &str) -> &str {
    match text.find(TOOL_RESPONSE_START) {
        Some(pos) => &text[..pos],
        None => text,
    }
}

/// Serialize a batch of tool results into the single combined observation
/// block the model sees next turn. Order matches invocation order.
pub fn wrap_tool_results(results: &[ToolResult]) -> String {
    let sections: Vec<String> = results
        .iter()
        .map(|r| format!("Tool '{}' Output:\n{}", r.tool_name, r.output))
        .collect();
    format!(
        "{}\n{}\n{}",
        TOOL_RESPONSE_START,
        sections.join("\n\n"),
        TOOL_RESPONSE_END
    )
}

/// Stop sequences preventing the model from emitting observations itself.
pub fn stop_sequences() -> Vec<String> {
    vec![
        format!("\n{TOOL_RESPONSE_START}"),
        TOOL_RESPONSE_START.to_string(),
    ]
}

fn truncate_for_log(s: &str) -> &str {
    let max = 50;
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
