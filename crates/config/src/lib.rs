//! Configuration loading, validation, and management for deepquest.
//!
//! Loads configuration from a TOML file with environment variable
//! overrides (`DEEPQUEST_*`). Every field has a serde default so a partial
//! file — or none at all — still yields a usable configuration. Validated
//! before any run starts.

use deepquest_core::SamplingParams;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Retry/backoff settings for the model gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum completion attempts per gateway call
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay in seconds
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,

    /// Backoff delay ceiling in seconds
    #[serde(default = "default_delay_cap")]
    pub max_delay_cap_secs: u64,
}

fn default_max_attempts() -> u32 {
    10
}
fn default_base_delay() -> u64 {
    1
}
fn default_delay_cap() -> u64 {
    30
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay(),
            max_delay_cap_secs: default_delay_cap(),
        }
    }
}

/// Persona-specific system prompts, selected by classified intent.
///
/// Prompt wording is the embedding application's concern; the defaults
/// here only keep the loop runnable out of the box.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaPrompts {
    /// Fallback system prompt when no category matches
    #[serde(default = "default_system_prompt")]
    pub default: String,

    /// Category slug → system prompt
    #[serde(default)]
    pub by_category: HashMap<String, String>,

    /// Directive sent when the token budget forces an immediate answer
    #[serde(default = "default_force_summarize")]
    pub force_summarize: String,
}

fn default_system_prompt() -> String {
    "You are a meticulous deep-research assistant. Reason step by step, \
     call tools to gather evidence, and give your final answer inside \
     <answer></answer> tags."
        .to_string()
}

fn default_force_summarize() -> String {
    "You have now reached the maximum context length you can handle. \
     You should stop making tool calls and, based on all the information \
     above, think again and provide what you consider the most likely \
     answer in the following format:\n\
     <think>your final thinking</think>\n<answer>your answer</answer>"
        .to_string()
}

impl Default for PersonaPrompts {
    fn default() -> Self {
        Self {
            default: default_system_prompt(),
            by_category: HashMap::new(),
            force_summarize: default_force_summarize(),
        }
    }
}

impl PersonaPrompts {
    /// The system prompt for a classified category.
    pub fn for_category(&self, category: &str) -> &str {
        self.by_category
            .get(category)
            .map(String::as_str)
            .unwrap_or(&self.default)
    }
}

/// The root agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model identifier passed through to the LLM client
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling parameters for every completion call
    #[serde(default)]
    pub sampling: SamplingParams,

    /// Iteration ceiling per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Token budget for the transcript
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Wall-clock ceiling per run, in minutes
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,

    /// When fewer than this many iterations remain, pruning gives way to
    /// forced summarization
    #[serde(default = "default_prune_safety_margin")]
    pub prune_safety_margin: u32,

    /// Gateway retry/backoff settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Persona prompts keyed by intent category
    #[serde(default)]
    pub prompts: PersonaPrompts,
}

fn default_model() -> String {
    "gpt-4o".into()
}
fn default_max_iterations() -> u32 {
    100
}
fn default_max_context_tokens() -> usize {
    110_000
}
fn default_timeout_minutes() -> u64 {
    150
}
fn default_prune_safety_margin() -> u32 {
    3
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            sampling: SamplingParams::default(),
            max_iterations: default_max_iterations(),
            max_context_tokens: default_max_context_tokens(),
            timeout_minutes: default_timeout_minutes(),
            prune_safety_margin: default_prune_safety_margin(),
            retry: RetryConfig::default(),
            prompts: PersonaPrompts::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file, apply environment overrides,
    /// and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        debug!(model = %config.model, max_iterations = config.max_iterations, "Config loaded");
        Ok(config)
    }

    /// Apply `DEEPQUEST_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("DEEPQUEST_MODEL")
            && !model.is_empty()
        {
            self.model = model;
        }
        if let Ok(v) = std::env::var("DEEPQUEST_MAX_ITERATIONS")
            && let Ok(n) = v.parse()
        {
            self.max_iterations = n;
        }
        if let Ok(v) = std::env::var("DEEPQUEST_MAX_CONTEXT_TOKENS")
            && let Ok(n) = v.parse()
        {
            self.max_context_tokens = n;
        }
        if let Ok(v) = std::env::var("DEEPQUEST_TIMEOUT_MINUTES")
            && let Ok(n) = v.parse()
        {
            self.timeout_minutes = n;
        }
    }

    /// Validate settings before any run starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".into()));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "max_iterations must be at least 1".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.sampling.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature {} out of range 0.0..=2.0",
                self.sampling.temperature
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
