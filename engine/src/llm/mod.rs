//! LLM Provider Abstraction Layer
//!
//! This module provides the contract the orchestration core depends on for
//! model invocation. A provider turns a conversation into a `Completion`
//! (response text plus, when the provider reports it, token usage) and
//! exposes an availability check. Prompt content and vendor APIs live behind
//! the trait; agents only see text in and text out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use sdk::errors::EngineError;

pub mod ollama;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Average characters per token used when a provider does not report usage
pub const CHARS_PER_TOKEN: usize = 4;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<LLMError> for EngineError {
    fn from(err: LLMError) -> Self {
        match err {
            LLMError::ProviderUnavailable(msg) => EngineError::ProviderUnavailable(msg),
            other => EngineError::ModelInvocationFailed(other.to_string()),
        }
    }
}

/// Message in a conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,

    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Response text
    pub text: String,

    /// Token usage reported by the provider, if any
    pub tokens_used: Option<u64>,
}

impl Completion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens_used: None,
        }
    }

    pub fn with_usage(mut self, tokens: u64) -> Self {
        self.tokens_used = Some(tokens);
        self
    }

    /// Reported usage, or an estimate over prompt and response when the
    /// provider under-reports
    pub fn token_cost(&self, prompt: &[Message]) -> u64 {
        match self.tokens_used {
            Some(tokens) if tokens > 0 => tokens,
            _ => {
                let prompt_chars: usize = prompt.iter().map(|m| m.content.chars().count()).sum();
                estimate_tokens_for_chars(prompt_chars + self.text.chars().count())
            }
        }
    }
}

/// Estimate token count as `ceil(chars / 4)`
pub fn estimate_tokens(text: &str) -> u64 {
    estimate_tokens_for_chars(text.chars().count())
}

fn estimate_tokens_for_chars(chars: usize) -> u64 {
    chars.div_ceil(CHARS_PER_TOKEN) as u64
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama")
    fn name(&self) -> &str;

    /// Generate a completion for the conversation
    async fn complete(&self, messages: &[Message]) -> Result<Completion>;

    /// Check if the provider is currently reachable.
    /// Default implementation returns true.
    async fn is_available(&self) -> bool {
        true
    }
}

/// Extract the first JSON object from free-form model output.
///
/// Handles raw JSON, fenced blocks (with or without trailing prose), and
/// objects embedded in prose.
pub fn extract_json_object(content: &str) -> Option<&str> {
    let trimmed = content.trim();

    if let Some(inner) = extract_fenced_json(trimmed) {
        let inner = inner.trim();
        if let Some(start) = inner.find('{') {
            if let Some(obj) = extract_balanced_json(&inner[start..]) {
                return Some(obj);
            }
        }
    }

    let start = trimmed.find('{')?;
    extract_balanced_json(&trimmed[start..])
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing ```.
fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals, to find the
/// matching close brace.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
