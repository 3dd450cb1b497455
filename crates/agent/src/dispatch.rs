//! Tool dispatcher — concurrent execution of one turn's invocations.
//!
//! All invocations in a batch launch in parallel and are joined before the
//! iteration proceeds. Failures are isolated: an unknown tool name, a tool
//! error, or a panicking tool task each become a failed [`ToolResult`] fed
//! back to the model; nothing aborts the batch.

use deepquest_core::{RunEvent, ToolInvocation, ToolRegistry, ToolResult};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Executes invocation batches against a read-only tool registry.
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Execute a batch of invocations concurrently.
    ///
    /// Emits one `ToolStarted` per invocation (in source order) before
    /// dispatch, and one `ToolFinished` as each individual result resolves
    /// (in completion order). The returned results match invocation order
    /// regardless of completion timing. Event-send failures mean the
    /// consumer disconnected; execution still runs to completion.
    pub async fn dispatch(
        &self,
        invocations: &[ToolInvocation],
        iteration: u32,
        events: &mpsc::Sender<RunEvent>,
    ) -> Vec<ToolResult> {
        for inv in invocations {
            let _ = events
                .send(RunEvent::ToolStarted {
                    tool: inv.name.clone(),
                    arguments: inv.arguments.clone(),
                    iteration,
                })
                .await;
        }

        let mut pending = FuturesUnordered::new();
        for (index, inv) in invocations.iter().cloned().enumerate() {
            let registry = self.registry.clone();
            let tool_name = inv.name.clone();
            // Spawned so a panicking tool is contained by the task boundary.
            let handle = tokio::spawn(async move { execute_one(registry, inv).await });
            pending.push(async move { (index, tool_name, handle.await) });
        }

        let mut indexed: Vec<(usize, ToolResult)> = Vec::with_capacity(invocations.len());
        while let Some((index, tool_name, joined)) = pending.next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!(tool = %tool_name, error = %e, "Tool task panicked");
                    ToolResult::failed(&tool_name, format!("[Error] Tool task aborted: {e}"))
                }
            };
            let _ = events
                .send(RunEvent::ToolFinished {
                    tool: result.tool_name.clone(),
                    output: result.output.clone(),
                    succeeded: result.succeeded,
                    iteration,
                })
                .await;
            indexed.push((index, result));
        }

        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, result)| result).collect()
    }
}

/// Resolve and run a single invocation, converting every failure mode into
/// a failed result.
async fn execute_one(registry: Arc<ToolRegistry>, inv: ToolInvocation) -> ToolResult {
    let Some(tool) = registry.get(&inv.name) else {
        return ToolResult::failed(
            &inv.name,
            format!(
                "[Error] Tool '{}' not found. Available: {:?}",
                inv.name,
                registry.names()
            ),
        );
    };

    debug!(tool = %inv.name, "Executing tool");
    match tool.invoke(inv.arguments.clone()).await {
        Ok(output) => ToolResult::ok(&inv.name, output),
        Err(e) => {
            warn!(tool = %inv.name, error = %e, "Tool execution failed");
            ToolResult::failed(&inv.name, format!("[Error] {e}"))
        }
    }
}
