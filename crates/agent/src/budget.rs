//! Token budget tracking — estimation and remediation policy.
//!
//! The tracker runs once per iteration after the latest exchange has been
//! appended. Pruning is preferred while enough iteration budget remains
//! for further research; forced summarization is the last resort.

use deepquest_core::{Message, Transcript};
use std::sync::Arc;
use tracing::debug;

/// Estimates transcript size in model tokens.
///
/// Implementations must be deterministic and monotonically non-decreasing
/// in transcript length.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, messages: &[Message]) -> usize;
}

/// Character-count heuristic: ~4 characters per token.
///
/// Accurate within ~10% for BPE tokenizers on English text; the default
/// when no exact tokenizer is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| m.content.len()).sum::<usize>() / 4
    }
}

/// Exact subword estimator backed by a HuggingFace tokenizer.
///
/// Falls back to the character heuristic if an encoding ever fails, so the
/// estimate stays total and monotone.
#[cfg(feature = "exact-tokenizer")]
pub struct ExactEstimator {
    tokenizer: tokenizers::Tokenizer,
}

#[cfg(feature = "exact-tokenizer")]
impl ExactEstimator {
    pub fn new(tokenizer: tokenizers::Tokenizer) -> Self {
        Self { tokenizer }
    }
}

#[cfg(feature = "exact-tokenizer")]
impl TokenEstimator for ExactEstimator {
    fn estimate(&self, messages: &[Message]) -> usize {
        let text = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        match self.tokenizer.encode(text.as_str(), false) {
            Ok(encoding) => encoding.get_ids().len(),
            Err(_) => text.len() / 4,
        }
    }
}

/// The remediation chosen for the current transcript size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetVerdict {
    /// Estimate within the limit; no action.
    WithinBudget,

    /// Over the limit with iteration budget to spare: compact the
    /// transcript and keep researching.
    Prune,

    /// Over the limit with too few iterations left for pruning to help:
    /// demand an immediate answer.
    ForceSummarize,
}

/// Number of messages kept from the start of the transcript when pruning
/// (system prompt + original question).
const PRUNE_HEAD: usize = 2;

/// Number of recent messages kept when pruning (last three exchanges).
const PRUNE_TAIL: usize = 6;

/// Tracks transcript size against the configured token limit.
pub struct BudgetTracker {
    limit: usize,
    safety_margin: u32,
    estimator: Arc<dyn TokenEstimator>,
}

impl BudgetTracker {
    pub fn new(limit: usize, safety_margin: u32, estimator: Arc<dyn TokenEstimator>) -> Self {
        Self {
            limit,
            safety_margin,
            estimator,
        }
    }

    /// Current token estimate for the transcript.
    pub fn estimate(&self, transcript: &Transcript) -> usize {
        self.estimator.estimate(&transcript.messages)
    }

    /// Decide the remediation for this iteration.
    pub fn check(&self, transcript: &Transcript, iteration: u32, max_iterations: u32) -> BudgetVerdict {
        let estimate = self.estimate(transcript);
        if estimate <= self.limit {
            return BudgetVerdict::WithinBudget;
        }

        let remaining = max_iterations.saturating_sub(iteration);
        debug!(estimate, limit = self.limit, remaining, "Token limit exceeded");
        if remaining > self.safety_margin {
            BudgetVerdict::Prune
        } else {
            BudgetVerdict::ForceSummarize
        }
    }

    /// Compact the transcript: first two messages, a synthetic system note,
    /// and the six most recent messages. Short transcripts are returned
    /// unchanged.
    pub fn prune(&self, transcript: &Transcript) -> Transcript {
        let messages = &transcript.messages;
        if messages.len() <= PRUNE_HEAD + PRUNE_TAIL {
            return transcript.clone();
        }

        let head = &messages[..PRUNE_HEAD];
        let tail = &messages[messages.len() - PRUNE_TAIL..];

        let mut kept: Vec<Message> = head.to_vec();
        kept.extend_from_slice(tail);
        let new_estimate = self.estimator.estimate(&kept);

        let note = Message::system(format!(
            "[System Note: Earlier conversation turns have been removed to \
             save tokens. Current token usage: {new_estimate}]"
        ));

        let mut pruned: Vec<Message> = head.to_vec();
        pruned.push(note);
        pruned.extend_from_slice(tail);
        Transcript { messages: pruned }
    }
}
