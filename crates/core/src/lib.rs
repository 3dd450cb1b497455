//! # deepquest Core
//!
//! Domain types, traits, and error definitions for the deepquest research-agent
//! runtime. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is defined as a trait here. Implementations live
//! in their respective crates (or in the embedding application): the LLM backend
//! behind [`LlmClient`], tools behind [`Tool`], intent classification behind
//! [`IntentClassifier`]. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod classify;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use classify::{Intent, IntentClassifier, StaticClassifier};
pub use error::{Error, ProviderError, Result, ToolError};
pub use event::{Outcome, RunEvent};
pub use message::{Message, Role, Transcript};
pub use provider::{CompletionRequest, LlmClient, SamplingParams};
pub use tool::{Tool, ToolDefinition, ToolInvocation, ToolRegistry, ToolResult};
