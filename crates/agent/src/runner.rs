//! The research loop — reason, act, observe, repeat.
//!
//! Each iteration asks the model for a turn, parses the protocol markup,
//! dispatches any tool calls, feeds the observations back, and enforces
//! the token budget. The loop ends with exactly one `Final` event, whether
//! the run answered, timed out, hit the iteration ceiling, or was forced
//! to summarize.

use deepquest_codec as codec;
use deepquest_config::AgentConfig;
use deepquest_core::{
    IntentClassifier, LlmClient, Message, Outcome, RunEvent, StaticClassifier, ToolRegistry,
    Transcript,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::budget::{BudgetTracker, BudgetVerdict, HeuristicEstimator, TokenEstimator};
use crate::dispatch::ToolDispatcher;
use crate::gateway::ModelGateway;

/// What a completed run produced, for callers that do not consume the
/// event stream directly.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub question: String,
    pub outcome: Outcome,
    pub iterations: u32,
    pub transcript: Transcript,
    pub execution_time: Duration,
}

/// The orchestration engine. Cheap to clone; every run gets its own
/// transcript and event channel, so one instance can serve concurrent
/// questions.
#[derive(Clone)]
pub struct ResearchLoop {
    client: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    classifier: Arc<dyn IntentClassifier>,
    estimator: Arc<dyn TokenEstimator>,
    config: AgentConfig,
}

impl ResearchLoop {
    pub fn new(client: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        Self {
            client,
            tools,
            classifier: Arc::new(StaticClassifier::default()),
            estimator: Arc::new(HeuristicEstimator),
            config,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Start a run and stream its events.
    ///
    /// The run executes on a spawned task; dropping the receiver cancels
    /// it at the next event boundary.
    pub fn stream_run(&self, question: impl Into<String>) -> mpsc::Receiver<RunEvent> {
        let (tx, rx) = mpsc::channel(128);
        let engine = self.clone();
        let question = question.into();
        tokio::spawn(async move {
            engine.drive(question, tx).await;
        });
        rx
    }

    /// Run to completion and collapse the event stream into a [`RunOutcome`].
    pub async fn run(&self, question: impl Into<String>) -> RunOutcome {
        let question = question.into();
        let started = std::time::Instant::now();
        let mut rx = self.stream_run(question.clone());

        let mut terminal = None;
        while let Some(event) = rx.recv().await {
            if event.is_final() {
                terminal = Some(event);
            }
        }

        match terminal {
            Some(RunEvent::Final {
                outcome,
                iterations,
                transcript,
            }) => RunOutcome {
                question,
                outcome,
                iterations,
                transcript,
                execution_time: started.elapsed(),
            },
            _ => RunOutcome {
                question,
                outcome: Outcome::Error {
                    message: "Run ended without a final outcome".into(),
                },
                iterations: 0,
                transcript: Transcript::new(),
                execution_time: started.elapsed(),
            },
        }
    }

    async fn drive(self, question: String, tx: mpsc::Sender<RunEvent>) {
        let gateway = ModelGateway::new(
            self.client.clone(),
            self.config.model.clone(),
            self.config.sampling.clone(),
            self.config.retry.clone(),
        );
        let dispatcher = ToolDispatcher::new(self.tools.clone());
        let budget = BudgetTracker::new(
            self.config.max_context_tokens,
            self.config.prune_safety_margin,
            self.estimator.clone(),
        );
        let deadline = Instant::now() + Duration::from_secs(self.config.timeout_minutes * 60);
        let max_iterations = self.config.max_iterations;

        if !emit(&tx, RunEvent::Status {
            content: "Identifying research intent...".into(),
        })
        .await
        {
            return;
        }
        let intent = self.classifier.classify(&question).await;
        info!(category = %intent.category, "Intent classified");
        if !emit(&tx, RunEvent::Status {
            content: format!("Research intent: {}", intent.category),
        })
        .await
        {
            return;
        }

        let mut transcript = Transcript::new();
        transcript.push(Message::system(
            self.config.prompts.for_category(&intent.category),
        ));
        transcript.push(Message::user(&question));

        let mut iteration: u32 = 0;
        while iteration < max_iterations {
            if Instant::now() >= deadline {
                warn!(iteration, "Run exceeded its wall-clock ceiling");
                let _ = emit(&tx, RunEvent::Final {
                    outcome: Outcome::TimedOut,
                    iterations: iteration,
                    transcript,
                })
                .await;
                return;
            }
            iteration += 1;

            if !emit(&tx, RunEvent::Status {
                content: format!("Iteration {iteration}/{max_iterations}"),
            })
            .await
            {
                return;
            }

            let response = gateway.complete(&transcript).await;
            if ModelGateway::was_failure(&response) {
                // The iteration is spent; the model may succeed next time.
                if !emit(&tx, RunEvent::Failure {
                    message: "Model call failed after all retries; skipping iteration".into(),
                })
                .await
                {
                    return;
                }
                continue;
            }

            transcript.push(Message::assistant(&response));
            let turn = codec::parse_turn(&response);

            if let Some(thought) = &turn.thought
                && !emit(&tx, RunEvent::Thought {
                    content: thought.clone(),
                })
                .await
            {
                return;
            }

            if let Some(answer) = turn.final_answer {
                info!(iteration, "Run answered");
                if !emit(&tx, RunEvent::Answer {
                    content: answer.clone(),
                })
                .await
                {
                    return;
                }
                let _ = emit(&tx, RunEvent::Final {
                    outcome: Outcome::Answered { answer },
                    iterations: iteration,
                    transcript,
                })
                .await;
                return;
            }

            if !turn.invocations.is_empty() {
                let results = dispatcher.dispatch(&turn.invocations, iteration, &tx).await;
                if tx.is_closed() {
                    return;
                }
                transcript.push(Message::tool_result(codec::wrap_tool_results(&results)));
            }

            match budget.check(&transcript, iteration, max_iterations) {
                BudgetVerdict::WithinBudget => {}
                BudgetVerdict::Prune => {
                    transcript = budget.prune(&transcript);
                    if !emit(&tx, RunEvent::Status {
                        content: "Context pruned to save tokens.".into(),
                    })
                    .await
                    {
                        return;
                    }
                }
                BudgetVerdict::ForceSummarize => {
                    if !emit(&tx, RunEvent::Status {
                        content: "Token limit reached, forcing final summary...".into(),
                    })
                    .await
                    {
                        return;
                    }
                    let outcome = self.force_summarize(&gateway, &mut transcript).await;
                    if let Some(answer) = outcome.answer_text()
                        && !emit(&tx, RunEvent::Answer {
                            content: answer.to_string(),
                        })
                        .await
                    {
                        return;
                    }
                    let _ = emit(&tx, RunEvent::Final {
                        outcome,
                        iterations: iteration,
                        transcript,
                    })
                    .await;
                    return;
                }
            }
        }

        warn!(max_iterations, "Run exhausted its iteration budget");
        if !emit(&tx, RunEvent::Failure {
            message: format!("No answer after {max_iterations} iterations"),
        })
        .await
        {
            return;
        }
        let _ = emit(&tx, RunEvent::Final {
            outcome: Outcome::MaxIterationsExceeded,
            iterations: max_iterations,
            transcript,
        })
        .await;
    }

    /// Replace the latest observation with the summarize instruction and
    /// take one last completion.
    async fn force_summarize(
        &self,
        gateway: &ModelGateway,
        transcript: &mut Transcript,
    ) -> Outcome {
        if let Some(last) = transcript.last_mut() {
            last.content = self.config.prompts.force_summarize.clone();
        }

        let response = gateway.complete(transcript).await;
        transcript.push(Message::assistant(&response));

        if codec::detect_final_answer(&response) {
            Outcome::TokenLimitForcedAnswer {
                answer: codec::extract_final_answer(&response),
            }
        } else {
            Outcome::TokenLimitFormatError {
                answer: response.trim().to_string(),
            }
        }
    }
}

async fn emit(tx: &mpsc::Sender<RunEvent>, event: RunEvent) -> bool {
    tx.send(event).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{EchoTool, FailingTool, SequentialMockClient};
    use async_trait::async_trait;
    use deepquest_core::{CompletionRequest, ProviderError, Role};

    fn test_config() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.max_iterations = 10;
        config.retry.max_attempts = 1;
        config
    }

    fn engine(responses: Vec<&str>, config: AgentConfig) -> ResearchLoop {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool));
        tools.register(Arc::new(FailingTool));
        ResearchLoop::new(
            Arc::new(SequentialMockClient::new(responses)),
            Arc::new(tools),
            config,
        )
    }

    async fn collect(engine: &ResearchLoop, question: &str) -> Vec<RunEvent> {
        let mut rx = engine.stream_run(question);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn final_of(events: &[RunEvent]) -> (&Outcome, u32, &Transcript) {
        match events.last() {
            Some(RunEvent::Final {
                outcome,
                iterations,
                transcript,
            }) => (outcome, *iterations, transcript),
            other => panic!("Last event is not Final: {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_call_then_answer() {
        let engine = engine(
            vec![
                "<think>I should check.</think>\n<tool_call>\n{\"name\": \"echo\", \"arguments\": {\"text\": \"observation\"}}\n</tool_call>",
                "<think>Got it.</think>\n<answer>final result</answer>",
            ],
            test_config(),
        );
        let events = collect(&engine, "What is it?").await;

        let (outcome, iterations, transcript) = final_of(&events);
        assert!(matches!(outcome, Outcome::Answered { answer } if answer == "final result"));
        assert_eq!(iterations, 2);

        // system, user, assistant, tool, assistant
        assert_eq!(transcript.len(), 5);
        assert_eq!(transcript.messages[2].role, Role::Assistant);
        assert_eq!(transcript.messages[3].role, Role::Tool);
        assert!(transcript.messages[3].content.contains("Tool 'echo' Output:"));
        assert!(transcript.messages[3].content.contains("observation"));

        let kinds: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert!(kinds.contains(&"thought"));
        assert!(kinds.contains(&"tool_started"));
        assert!(kinds.contains(&"tool_finished"));
        assert!(kinds.contains(&"answer"));
        assert_eq!(*kinds.last().unwrap(), "final");
        assert_eq!(events.iter().filter(|e| e.is_final()).count(), 1);
    }

    #[tokio::test]
    async fn answer_on_first_turn_skips_tools() {
        let engine = engine(
            vec!["<think>Trivial.</think>\n<answer>42</answer>"],
            test_config(),
        );
        let events = collect(&engine, "6 times 7?").await;
        let (outcome, iterations, _) = final_of(&events);
        assert!(matches!(outcome, Outcome::Answered { answer } if answer == "42"));
        assert_eq!(iterations, 1);
        assert!(!events.iter().any(|e| e.event_type() == "tool_started"));
    }

    #[tokio::test]
    async fn answer_wins_over_same_turn_tool_calls() {
        let engine = engine(
            vec![
                "<tool_call>\n{\"name\": \"echo\", \"arguments\": {\"text\": \"x\"}}\n</tool_call>\n<answer>done anyway</answer>",
            ],
            test_config(),
        );
        let events = collect(&engine, "q").await;
        let (outcome, _, _) = final_of(&events);
        assert!(matches!(outcome, Outcome::Answered { answer } if answer == "done anyway"));
        assert!(!events.iter().any(|e| e.event_type() == "tool_started"));
    }

    #[tokio::test]
    async fn unknown_tool_feeds_error_back_and_loop_recovers() {
        let engine = engine(
            vec![
                "<tool_call>\n{\"name\": \"websearch\", \"arguments\": {}}\n</tool_call>",
                "<answer>recovered</answer>",
            ],
            test_config(),
        );
        let events = collect(&engine, "q").await;
        let (outcome, _, transcript) = final_of(&events);
        assert!(matches!(outcome, Outcome::Answered { .. }));
        let observation = &transcript.messages[3].content;
        assert!(observation.contains("'websearch' not found"));
        assert!(observation.contains("echo"));
    }

    #[tokio::test]
    async fn noop_turn_consumes_iteration_and_continues() {
        let engine = engine(
            vec![
                "<think>Just musing, no action.</think>",
                "<answer>eventually</answer>",
            ],
            test_config(),
        );
        let events = collect(&engine, "q").await;
        let (outcome, iterations, _) = final_of(&events);
        assert!(matches!(outcome, Outcome::Answered { .. }));
        assert_eq!(iterations, 2);
    }

    #[tokio::test]
    async fn iteration_ceiling_yields_max_iterations_outcome() {
        let mut config = test_config();
        config.max_iterations = 3;
        let engine = engine(vec!["<think>Still thinking...</think>"], config);
        let events = collect(&engine, "q").await;
        let (outcome, iterations, _) = final_of(&events);
        assert!(matches!(outcome, Outcome::MaxIterationsExceeded));
        assert_eq!(iterations, 3);
        assert!(events.iter().any(|e| e.event_type() == "failure"));
    }

    #[tokio::test]
    async fn zero_timeout_produces_timed_out_before_any_model_call() {
        let mut config = test_config();
        config.timeout_minutes = 0;
        let engine = engine(vec!["<answer>never seen</answer>"], config);
        let events = collect(&engine, "q").await;
        let (outcome, iterations, _) = final_of(&events);
        assert!(matches!(outcome, Outcome::TimedOut));
        assert_eq!(iterations, 0);
    }

    #[tokio::test]
    async fn model_failure_consumes_iteration_without_transcript_append() {
        struct BrokenClient;

        #[async_trait]
        impl LlmClient for BrokenClient {
            fn name(&self) -> &str {
                "broken"
            }
            async fn complete(
                &self,
                _request: CompletionRequest,
            ) -> Result<String, ProviderError> {
                Err(ProviderError::Network("connection refused".into()))
            }
        }

        let mut config = test_config();
        config.max_iterations = 2;
        let engine = ResearchLoop::new(
            Arc::new(BrokenClient),
            Arc::new(ToolRegistry::new()),
            config,
        );
        let events = collect(&engine, "q").await;
        let (outcome, iterations, transcript) = final_of(&events);
        assert!(matches!(outcome, Outcome::MaxIterationsExceeded));
        assert_eq!(iterations, 2);
        // system + user only; failed turns append nothing
        assert_eq!(transcript.len(), 2);
        assert!(
            events
                .iter()
                .filter(|e| matches!(e, RunEvent::Failure { message } if message.contains("retries")))
                .count()
                >= 2
        );
    }

    #[tokio::test]
    async fn token_limit_forces_summary_with_answer() {
        let mut config = test_config();
        config.max_context_tokens = 10;
        config.max_iterations = 4;
        config.prune_safety_margin = 10;
        let engine = engine(
            vec![
                "<tool_call>\n{\"name\": \"echo\", \"arguments\": {\"text\": \"a very long observation that blows the tiny budget\"}}\n</tool_call>",
                "<think>Summing up.</think>\n<answer>forced summary</answer>",
            ],
            config,
        );
        let events = collect(&engine, "q").await;
        let (outcome, _, transcript) = final_of(&events);
        assert!(
            matches!(outcome, Outcome::TokenLimitForcedAnswer { answer } if answer == "forced summary")
        );
        // The observation message was replaced by the summarize instruction.
        assert!(
            transcript
                .messages
                .iter()
                .any(|m| m.content.contains("maximum context length"))
        );
        assert!(events.iter().any(
            |e| matches!(e, RunEvent::Answer { content } if content == "forced summary")
        ));
    }

    #[tokio::test]
    async fn token_limit_format_error_when_summary_lacks_answer_tag() {
        let mut config = test_config();
        config.max_context_tokens = 10;
        config.max_iterations = 4;
        config.prune_safety_margin = 10;
        let engine = engine(
            vec![
                "<tool_call>\n{\"name\": \"echo\", \"arguments\": {\"text\": \"padding padding padding padding padding\"}}\n</tool_call>",
                "I ran out of room and forgot the tags.",
            ],
            config,
        );
        let events = collect(&engine, "q").await;
        let (outcome, _, _) = final_of(&events);
        assert!(
            matches!(outcome, Outcome::TokenLimitFormatError { answer }
                if answer == "I ran out of room and forgot the tags.")
        );
    }

    #[tokio::test]
    async fn prune_path_emits_status_and_run_continues() {
        let mut config = test_config();
        config.max_context_tokens = 10;
        config.max_iterations = 50;
        config.prune_safety_margin = 3;
        let engine = engine(
            vec![
                "<tool_call>\n{\"name\": \"echo\", \"arguments\": {\"text\": \"long long long long long output\"}}\n</tool_call>",
                "<answer>after pruning</answer>",
            ],
            config,
        );
        let events = collect(&engine, "q").await;
        let (outcome, _, _) = final_of(&events);
        assert!(matches!(outcome, Outcome::Answered { answer } if answer == "after pruning"));
        assert!(events.iter().any(
            |e| matches!(e, RunEvent::Status { content } if content.contains("pruned"))
        ));
    }

    #[tokio::test]
    async fn run_collapses_stream_into_outcome() {
        let engine = engine(vec!["<answer>collapsed</answer>"], test_config());
        let result = engine.run("q").await;
        assert_eq!(result.question, "q");
        assert_eq!(result.iterations, 1);
        assert_eq!(result.outcome.answer_text(), Some("collapsed"));
        assert!(!result.transcript.is_empty());
    }

    #[tokio::test]
    async fn event_stream_composes_with_stream_adapters() {
        use tokio_stream::StreamExt;
        use tokio_stream::wrappers::ReceiverStream;

        let engine = engine(vec!["<answer>streamed</answer>"], test_config());
        let events: Vec<RunEvent> = ReceiverStream::new(engine.stream_run("q"))
            .collect()
            .await;
        assert!(events.last().unwrap().is_final());
    }

    #[tokio::test]
    async fn dropping_receiver_cancels_the_run() {
        let engine = engine(vec!["<think>looping forever</think>"], test_config());
        let rx = engine.stream_run("q");
        drop(rx);
        // The drive task notices the closed channel at its next send and
        // stops; nothing to assert beyond not hanging.
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn system_prompt_follows_classified_category() {
        let mut config = test_config();
        config
            .prompts
            .by_category
            .insert("finance".into(), "You are a financial analyst.".into());

        struct FinanceClassifier;

        #[async_trait]
        impl IntentClassifier for FinanceClassifier {
            async fn classify(&self, _question: &str) -> deepquest_core::Intent {
                deepquest_core::Intent {
                    category: "finance".into(),
                    reason: "mentions revenue".into(),
                }
            }
        }

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool));
        let engine = ResearchLoop::new(
            Arc::new(SequentialMockClient::new(vec!["<answer>ok</answer>"])),
            Arc::new(tools),
            config,
        )
        .with_classifier(Arc::new(FinanceClassifier));

        let events = collect(&engine, "What was Q3 revenue?").await;
        let (_, _, transcript) = final_of(&events);
        assert_eq!(transcript.messages[0].role, Role::System);
        assert_eq!(transcript.messages[0].content, "You are a financial analyst.");
        assert!(events.iter().any(
            |e| matches!(e, RunEvent::Status { content } if content.contains("finance"))
        ));
    }
}
