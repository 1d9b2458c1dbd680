//! Ollama LLM Provider
//!
//! This module implements the LLMProvider trait for Ollama, a local LLM provider.
//! Ollama runs models locally on the user's machine, typically at http://localhost:11434.
//!
//! Key features:
//! - Local execution (no API keys required)
//! - Non-streaming chat completions via `/api/chat`
//! - Token usage from `prompt_eval_count + eval_count`
//! - Availability probe via `/api/tags`

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Completion, LLMError, LLMProvider, Message, MessageRole, Result};

/// Timeout for the availability probe
const HEALTH_TIMEOUT_SECS: u64 = 5;

/// Ollama provider configuration
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    /// Base URL for Ollama API (typically http://localhost:11434)
    base_url: String,

    /// Model name to use (e.g., "llama3.1:8b")
    model: String,

    /// HTTP client for API requests
    client: Client,
}

impl OllamaProvider {
    /// Create a new Ollama provider
    ///
    /// # Arguments
    /// * `base_url` - Base URL for Ollama API (e.g., "http://localhost:11434")
    /// * `model` - Model name to use (e.g., "llama3.1:8b")
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client: Client::new(),
        }
    }

    /// Convert our Message format to Ollama's format
    fn convert_messages(&self, messages: &[Message]) -> Vec<OllamaMessage> {
        messages
            .iter()
            .map(|msg| OllamaMessage {
                role: match msg.role {
                    MessageRole::User => "user".to_string(),
                    MessageRole::Assistant => "assistant".to_string(),
                    MessageRole::System => "system".to_string(),
                },
                content: msg.content.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, messages: &[Message]) -> Result<Completion> {
        let ollama_messages = self.convert_messages(messages);

        tracing::debug!(
            "Ollama request: model={}, messages={}, total_chars={}",
            self.model,
            ollama_messages.len(),
            ollama_messages
                .iter()
                .map(|m| m.content.len())
                .sum::<usize>()
        );

        let request = OllamaRequest {
            model: self.model.clone(),
            messages: ollama_messages,
            stream: false,
        };

        let url = format!("{}/api/chat", self.base_url);
        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else if e.is_connect() {
                    LLMError::ProviderUnavailable(format!(
                        "Cannot connect to Ollama at {}. Is Ollama running?",
                        self.base_url
                    ))
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        tracing::info!(
            "Ollama response received in {:.1}s",
            start.elapsed().as_secs_f64()
        );

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LLMError::InvalidRequest(format!(
                "Ollama API error ({}): {}",
                status, error_text
            )));
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(format!("Failed to parse Ollama response: {}", e)))?;

        let mut completion = Completion::new(ollama_response.message.content);
        let usage = ollama_response.prompt_eval_count.unwrap_or(0)
            + ollama_response.eval_count.unwrap_or(0);
        if usage > 0 {
            completion = completion.with_usage(usage);
        }
        Ok(completion)
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Ollama availability probe failed: {}", e);
                false
            }
        }
    }
}

/// Ollama API request format
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
}

/// Ollama message format
#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

/// Ollama API response format
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_provider_properties() {
        let provider = OllamaProvider::new("http://localhost:11434/", "llama3.1:8b");

        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_message_conversion() {
        let provider = OllamaProvider::new("http://localhost:11434", "llama3.1:8b");

        let messages = vec![
            Message::system("You are a helpful assistant"),
            Message::user("Hello"),
            Message::assistant("Hi there"),
        ];

        let ollama_messages = provider.convert_messages(&messages);

        assert_eq!(ollama_messages.len(), 3);
        assert_eq!(ollama_messages[0].role, "system");
        assert_eq!(ollama_messages[1].role, "user");
        assert_eq!(ollama_messages[2].role, "assistant");
    }

    #[test]
    fn test_response_without_usage_parses() {
        let body = r#"{"model":"m","message":{"role":"assistant","content":"hi"},"done":true}"#;
        let parsed: OllamaResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.message.content, "hi");
        assert!(parsed.eval_count.is_none());
    }
}
