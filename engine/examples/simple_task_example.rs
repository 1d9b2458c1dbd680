//! Example demonstrating one task end to end
//!
//! This example shows how to:
//! - Build an orchestrator with the Director and Code agents
//! - Process a task against a local model
//! - Inspect the execution trace and what memory learned
//!
//! Prerequisites:
//! - Ollama must be installed and running
//! - A model must be available (e.g., qwen2.5-coder:7b)

use hive_engine::{
    config::{Config, MemoryBackend},
    llm::{ollama::OllamaProvider, LLMProvider},
    orchestrator::TaskOrchestrator,
};
use sdk::types::Task;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Simple Task Execution Example ===\n");

    let temp_dir = TempDir::new()?;
    let mut config = Config::default_config();
    config.core.data_dir = temp_dir.path().to_path_buf();
    config.memory.backend = MemoryBackend::Sqlite;

    let ollama = OllamaProvider::new("http://localhost:11434", "qwen2.5-coder:7b");
    if !ollama.is_available().await {
        eprintln!("❌ Ollama is not reachable at http://localhost:11434");
        return Ok(());
    }
    println!("✓ LLM Provider: {}", ollama.name());

    let orchestrator = TaskOrchestrator::from_config(&config, Arc::new(ollama)).await?;
    println!("✓ Memory database: {}\n", config.database_path().display());

    let task = Task::new(
        "Implement a rate limiter function",
        "Token bucket in Rust with a configurable refill rate",
    );
    println!("📝 Task: {}\n", task.title);

    let outcome = orchestrator.process_task(task).await;

    println!("Agent:     {}", outcome.agent_id.as_deref().unwrap_or("none"));
    println!("Success:   {}", outcome.result.success);
    println!("Validated: {}", outcome.validated);
    println!("Tokens:    {}", outcome.tokens_used);
    println!("Reasoning: {}\n", outcome.result.reasoning);

    println!("📊 Trace:");
    for span in &outcome.trace.spans {
        println!(
            "  {:<28} {:>6}ms  {} event(s)",
            span.operation,
            span.duration_ms().unwrap_or_default(),
            span.events.len()
        );
    }

    let patterns = orchestrator.memory().long_term().patterns().await?;
    println!("\n🧠 Learned {} pattern(s)", patterns.len());
    for pattern in patterns {
        println!("  [{}] {} ({})", pattern.pattern_type, pattern.pattern, pattern.description);
    }

    Ok(())
}
