//! Model gateway — one resilient request/response round-trip to the LLM.
//!
//! Wraps a single chat-completion call with bounded retry and exponential
//! backoff. Retries on errors and on empty completions; a non-empty
//! response is accepted immediately regardless of content. Exhausting all
//! attempts yields a sentinel string instead of an error, so the loop can
//! record a `Failure` event and carry on rather than crash.

use deepquest_codec as codec;
use deepquest_config::RetryConfig;
use deepquest_core::{CompletionRequest, LlmClient, SamplingParams, Transcript};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Returned when every attempt failed or came back empty.
pub const FAILURE_SENTINEL: &str = "LLM call failed after all retries";

/// A retrying wrapper around an [`LlmClient`].
pub struct ModelGateway {
    client: Arc<dyn LlmClient>,
    model: String,
    sampling: SamplingParams,
    retry: RetryConfig,
}

impl ModelGateway {
    pub fn new(
        client: Arc<dyn LlmClient>,
        model: impl Into<String>,
        sampling: SamplingParams,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            sampling,
            retry,
        }
    }

    /// Whether a gateway response is the exhaustion sentinel.
    pub fn was_failure(text: &str) -> bool {
        text == FAILURE_SENTINEL
    }

    /// One completion over the transcript.
    ///
    /// The stop-sequence set always includes the tool-response open tag,
    /// and any content after that tag in the response is cut before the
    /// text is returned — both guard against the model fabricating its own
    /// observation.
    pub async fn complete(&self, transcript: &Transcript) -> String {
        let mut delay = Duration::from_secs(self.retry.base_delay_secs);
        let cap = Duration::from_secs(self.retry.max_delay_cap_secs);

        for attempt in 1..=self.retry.max_attempts {
            let request = CompletionRequest {
                model: self.model.clone(),
                messages: transcript.messages.clone(),
                sampling: self.sampling.clone(),
                stop: codec::stop_sequences(),
            };

            match self.client.complete(request).await {
                Ok(text) if !text.trim().is_empty() => {
                    debug!(attempt, chars = text.len(), "Completion accepted");
                    return codec::truncate_at_tool_response(&text).trim().to_string();
                }
                Ok(_) => {
                    warn!(attempt, "Empty completion, retrying");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Model call failed, retrying");
                }
            }

            if attempt < self.retry.max_attempts {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(cap);
            }
        }

        warn!(attempts = self.retry.max_attempts, "All completion attempts exhausted");
        FAILURE_SENTINEL.to_string()
    }
}
