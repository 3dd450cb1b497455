//! LlmClient trait — the abstraction over chat-completion backends.
//!
//! The runtime consumes the backend through one narrow contract: given an
//! ordered transcript plus sampling parameters, produce text. Concrete
//! HTTP clients live in the embedding application.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;

/// Sampling parameters for a completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Temperature (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Nucleus sampling probability mass
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Presence penalty, discourages the model from looping
    #[serde(default = "default_presence_penalty")]
    pub presence_penalty: f32,

    /// Maximum tokens to generate per response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.6
}
fn default_top_p() -> f32 {
    0.95
}
fn default_presence_penalty() -> f32 {
    1.1
}
fn default_max_tokens() -> u32 {
    10_000
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            presence_penalty: default_presence_penalty(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// One completion request: ordered messages, sampling, stop sequences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use (e.g., "gpt-4o")
    pub model: String,

    /// The transcript messages, in order
    pub messages: Vec<Message>,

    /// Sampling parameters
    pub sampling: SamplingParams,

    /// Stop sequences. The loop always includes the tool-response open
    /// tag here so the model cannot hallucinate its own observations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// The chat-completion backend contract.
///
/// A successful call returns the raw completion text; everything else is a
/// [`ProviderError`] that the model gateway retries with backoff.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// A human-readable name for this client (e.g., "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get the completion text.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<String, ProviderError>;
}
