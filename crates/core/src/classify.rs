//! Intent classification — an external collaborator consulted once per run.
//!
//! The loop uses the classified category to select a persona-specific
//! system prompt before the first model call. Classification must never
//! fail a run: implementations fall back to a general category internally.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The classified intent of a research question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    /// Category slug, e.g. "coding_tech", "finance_market", "general"
    pub category: String,

    /// Brief justification, surfaced in a status event
    pub reason: String,
}

impl Intent {
    /// The fallback intent used when classification is unavailable.
    pub fn general(reason: impl Into<String>) -> Self {
        Self {
            category: "general".into(),
            reason: reason.into(),
        }
    }
}

/// Classifies a question so the loop can pick a persona prompt.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Classify the question. Infallible by contract — implementations
    /// degrade to [`Intent::general`] on any internal error.
    async fn classify(&self, question: &str) -> Intent;
}

/// A classifier that always returns the same category.
///
/// The default collaborator when no model-backed classifier is wired in.
pub struct StaticClassifier {
    category: String,
}

impl StaticClassifier {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
        }
    }
}

impl Default for StaticClassifier {
    fn default() -> Self {
        Self::new("general")
    }
}

#[async_trait]
impl IntentClassifier for StaticClassifier {
    async fn classify(&self, _question: &str) -> Intent {
        Intent {
            category: self.category.clone(),
            reason: "static classifier".into(),
        }
    }
}
