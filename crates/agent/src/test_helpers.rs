//! Shared mocks for agent tests.

use async_trait::async_trait;
use deepquest_core::{CompletionRequest, LlmClient, ProviderError, Tool, ToolError};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Replays a fixed script of completions, one per call.
///
/// Once the script runs out it keeps returning the last entry, so a test
/// that scripts N turns never hangs the loop on an empty completion.
pub struct SequentialMockClient {
    responses: Vec<String>,
    cursor: AtomicUsize,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl SequentialMockClient {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: responses.into_iter().map(String::from).collect(),
            cursor: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for SequentialMockClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let index = index.min(self.responses.len().saturating_sub(1));
        match self.responses.get(index) {
            Some(text) => Ok(text.clone()),
            None => Err(ProviderError::EmptyCompletion),
        }
    }
}

/// Echoes back the `text` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes back the input"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }
    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        Ok(arguments["text"].as_str().unwrap_or("").to_string())
    }
}

/// Always returns an execution error.
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "fail"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }
    async fn invoke(&self, _arguments: serde_json::Value) -> Result<String, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "fail".into(),
            reason: "intentional test failure".into(),
        })
    }
}

/// Sleeps before answering; used to exercise completion-order handling.
pub struct SlowTool {
    delay: Duration,
}

impl SlowTool {
    pub fn millis(ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(ms),
        }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }
    fn description(&self) -> &str {
        "Answers after a delay"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }
    async fn invoke(&self, _arguments: serde_json::Value) -> Result<String, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok("done".to_string())
    }
}
