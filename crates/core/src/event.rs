//! Run events and terminal outcomes.
//!
//! Every observable state change of a run is emitted as a [`RunEvent`].
//! Consumers (streaming endpoints, persistence layers, terminal UIs)
//! subscribe to the sequence; it is causally ordered and ends with exactly
//! one `Final` event carrying the [`Outcome`].

use serde::{Deserialize, Serialize};

use crate::message::Transcript;

/// The terminal classification of a run. Exactly one Outcome per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// The model emitted a final answer.
    Answered { answer: String },

    /// The wall-clock ceiling was exceeded.
    TimedOut,

    /// The iteration ceiling was reached without an answer.
    MaxIterationsExceeded,

    /// Token limit hit; the forced summary contained an answer tag.
    TokenLimitForcedAnswer { answer: String },

    /// Token limit hit; the forced summary lacked an answer tag, so the
    /// raw response stands in as a best effort.
    TokenLimitFormatError { answer: String },

    /// An unexpected failure escaped the loop itself.
    Error { message: String },
}

impl Outcome {
    /// The human-readable termination reason carried by `Final`.
    pub fn termination(&self) -> &'static str {
        match self {
            Self::Answered { .. } => "answer",
            Self::TimedOut => "timeout",
            Self::MaxIterationsExceeded => "max_iterations_exceeded",
            Self::TokenLimitForcedAnswer { .. } => "token_limit_forced_answer",
            Self::TokenLimitFormatError { .. } => "token_limit_format_error",
            Self::Error { .. } => "error",
        }
    }

    /// The answer text, where the outcome carries one.
    pub fn answer_text(&self) -> Option<&str> {
        match self {
            Self::Answered { answer }
            | Self::TokenLimitForcedAnswer { answer }
            | Self::TokenLimitFormatError { answer } => Some(answer),
            _ => None,
        }
    }
}

/// One unit of the observable run timeline.
///
/// Invariants:
/// - a `ToolStarted` for invocation X always precedes the matching
///   `ToolFinished`;
/// - `Final` is always the last event of a run, and unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// Progress note (intent classification, iteration counter, pruning).
    Status { content: String },

    /// A reasoning segment extracted from the model turn.
    Thought { content: String },

    /// A tool invocation is being dispatched.
    ToolStarted {
        tool: String,
        arguments: serde_json::Value,
        iteration: u32,
    },

    /// One tool invocation completed (success or failure).
    ToolFinished {
        tool: String,
        output: String,
        succeeded: bool,
        iteration: u32,
    },

    /// The model emitted a final answer (precedes `Final`).
    Answer { content: String },

    /// A recoverable failure worth surfacing (model retries exhausted,
    /// iteration ceiling).
    Failure { message: String },

    /// The terminal event: outcome, iteration count, full transcript.
    Final {
        outcome: Outcome,
        iterations: u32,
        transcript: Transcript,
    },
}

impl RunEvent {
    /// Stable event name for sinks (SSE event field, log tag).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Thought { .. } => "thought",
            Self::ToolStarted { .. } => "tool_started",
            Self::ToolFinished { .. } => "tool_finished",
            Self::Answer { .. } => "answer",
            Self::Failure { .. } => "failure",
            Self::Final { .. } => "final",
        }
    }

    /// Whether this event terminates the run.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final { .. })
    }
}
