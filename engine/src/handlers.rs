//! Command handlers
//!
//! One function per CLI command. Each builds what it needs from config and
//! prints in the requested [`OutputFormat`].

use anyhow::{Context, Result};
use sdk::types::{Priority, Task};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::Config;
use crate::llm::ollama::OllamaProvider;
use crate::llm::LLMProvider;
use crate::orchestrator::{TaskOrchestrator, TaskOutcome};

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Model provider selected by `llm.provider`
pub fn build_provider(config: &Config) -> Result<Arc<dyn LLMProvider>> {
    match config.llm.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaProvider::new(
            config.llm.ollama.base_url.clone(),
            config.llm.ollama.model.clone(),
        ))),
        other => Err(anyhow::anyhow!("Unsupported LLM provider '{}'", other)),
    }
}

/// Split a `key=value` metadata argument. Values that parse as JSON keep
/// their JSON type; anything else is a string.
pub fn parse_meta(entry: &str) -> Result<(String, Value)> {
    let (key, raw) = entry
        .split_once('=')
        .with_context(|| format!("Metadata '{}' is not in key=value form", entry))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Metadata '{}' has an empty key", entry);
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

pub async fn handle_run(
    title: String,
    description: String,
    priority: Priority,
    meta: Vec<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let mut task = Task::new(title, description).with_priority(priority);
    for entry in &meta {
        let (key, value) = parse_meta(entry)?;
        task = task.with_metadata(key, value);
    }

    let orchestrator = TaskOrchestrator::from_config(config, build_provider(config)?).await?;

    if format == OutputFormat::Text {
        println!("Executing task: {}", task.title);
        println!();
    }

    let outcome = orchestrator.process_task(task).await;
    print_outcome(&outcome, format)?;

    if outcome.result.success {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Task failed: {}", outcome.result.reasoning))
    }
}

fn print_outcome(outcome: &TaskOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(outcome)?);
        }
        OutputFormat::Text => {
            if let Some(output) = &outcome.result.output {
                println!("Result:");
                match output.as_str() {
                    Some(text) => println!("{}", text),
                    None => println!("{}", serde_json::to_string_pretty(output)?),
                }
                println!();
            }
            let mark = if outcome.result.success { "✓" } else { "✗" };
            println!("{} {}", mark, outcome.result.reasoning);
            println!("  Session:   {}", outcome.session_id);
            println!(
                "  Agent:     {}",
                outcome.agent_id.as_deref().unwrap_or("none")
            );
            println!("  Validated: {}", outcome.validated);
            println!("  Tokens:    {}", outcome.tokens_used);
            println!("  Duration:  {}ms", outcome.result.duration_ms);
            println!("  Spans:     {}", outcome.trace.spans.len());
        }
    }
    Ok(())
}

pub async fn handle_status(config: &Config, format: OutputFormat) -> Result<()> {
    let provider = build_provider(config)?;
    let available = provider.is_available().await;
    let orchestrator = TaskOrchestrator::from_config(config, provider).await?;
    let status = orchestrator.get_status().await;

    match format {
        OutputFormat::Json => {
            let output = json!({
                "status": status,
                "provider_available": available,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!("Agents: {}", status.registry.total);
            for (agent_type, count) in &status.registry.by_type {
                println!("  {:<10} {}", agent_type, count);
            }
            println!(
                "Provider: {} ({})",
                status.provider,
                if available { "available" } else { "unavailable" }
            );
            println!(
                "Bus: {} subscriber(s), {}/{} messages in history",
                status.bus.subscribers, status.bus.history_len, status.bus.capacity
            );
        }
    }
    Ok(())
}

pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => println!("{}", toml::to_string_pretty(config)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meta() {
        assert_eq!(
            parse_meta("complexity=high").unwrap(),
            ("complexity".to_string(), json!("high"))
        );
        assert_eq!(parse_meta("retries=3").unwrap().1, json!(3));
        assert_eq!(parse_meta("expr=a=b").unwrap().1, json!("a=b"));
        assert!(parse_meta("novalue").is_err());
        assert!(parse_meta("=x").is_err());
    }

    #[test]
    fn test_unsupported_provider() {
        let mut config = Config::default_config();
        config.llm.provider = "mystery".to_string();
        assert!(build_provider(&config).is_err());
        config.llm.provider = "ollama".to_string();
        assert_eq!(build_provider(&config).unwrap().name(), "ollama");
    }
}
