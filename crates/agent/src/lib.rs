//! The deepquest orchestration engine.
//!
//! Wires the protocol codec, token budget tracking, tool dispatch, and the
//! retrying model gateway into the research loop. Construct a
//! [`ResearchLoop`] with an [`LlmClient`](deepquest_core::LlmClient)
//! implementation, a populated
//! [`ToolRegistry`](deepquest_core::ToolRegistry), and an
//! [`AgentConfig`](deepquest_config::AgentConfig), then call
//! [`ResearchLoop::stream_run`] for the event stream or
//! [`ResearchLoop::run`] for the collapsed outcome.

pub mod budget;
pub mod dispatch;
pub mod gateway;
pub mod runner;

#[cfg(test)]
mod test_helpers;

pub use budget::{BudgetTracker, BudgetVerdict, HeuristicEstimator, TokenEstimator};
#[cfg(feature = "exact-tokenizer")]
pub use budget::ExactEstimator;
pub use dispatch::ToolDispatcher;
pub use gateway::{FAILURE_SENTINEL, ModelGateway};
pub use runner::{ResearchLoop, RunOutcome};
