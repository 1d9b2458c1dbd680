//! Agents
//!
//! An agent is an [`Agent`] lifecycle wrapped around an [`AgentBehavior`].
//! The wrapper owns the cross-cutting parts of every run (initialization,
//! tracing, recall, failure capture, state) so concrete behaviours only
//! decide how to plan, execute and validate.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{AgentMetadata, AgentResult, Plan, Task};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::bus::CommunicationBus;
use crate::context::ExecutionContext;
use crate::llm::{LLMProvider, Message};
use crate::memory::{MemoryCoordinator, RecalledMemory};
use crate::trace::attrs;

pub mod base;
pub mod code;
pub mod director;

pub use base::{Agent, AgentState};
pub use code::CodeAgent;
pub use director::DirectorAgent;

/// Default hard timeout for one model call
pub const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(120);

/// Shared services every agent is constructed with
#[derive(Clone)]
pub struct AgentServices {
    pub llm: Arc<dyn LLMProvider>,
    pub memory: Arc<MemoryCoordinator>,
    pub bus: Arc<CommunicationBus>,
    pub model_timeout: Duration,
}

/// Text and token cost of one model call
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub text: String,
    pub tokens: u64,
}

impl AgentServices {
    pub fn new(
        llm: Arc<dyn LLMProvider>,
        memory: Arc<MemoryCoordinator>,
        bus: Arc<CommunicationBus>,
    ) -> Self {
        Self {
            llm,
            memory,
            bus,
            model_timeout: DEFAULT_MODEL_TIMEOUT,
        }
    }

    pub fn with_model_timeout(mut self, model_timeout: Duration) -> Self {
        self.model_timeout = model_timeout;
        self
    }

    /// Call the model inside a `<Name>.model` span.
    ///
    /// Token usage is added to the context. The span is closed on every path,
    /// including timeout.
    pub async fn invoke_model(
        &self,
        metadata: &AgentMetadata,
        ctx: &mut ExecutionContext,
        messages: &[Message],
    ) -> Result<ModelOutput, EngineError> {
        let span = ctx
            .trace
            .start_span(&metadata.id, format!("{}.model", metadata.name));
        ctx.trace
            .set_attribute(&span, "provider", json!(self.llm.name()));

        let outcome = match timeout(self.model_timeout, self.llm.complete(messages)).await {
            Ok(Ok(completion)) => {
                let tokens = completion.token_cost(messages);
                Ok(ModelOutput {
                    text: completion.text,
                    tokens,
                })
            }
            Ok(Err(e)) => Err(EngineError::from(e)),
            Err(_) => Err(EngineError::ModelTimeout(self.model_timeout.as_secs())),
        };

        match &outcome {
            Ok(output) => {
                ctx.add_tokens(output.tokens);
                ctx.trace
                    .set_attribute(&span, "tokens", json!(output.tokens));
            }
            Err(e) => {
                ctx.trace
                    .add_event(&span, "model.error", attrs([("error", json!(e.to_string()))]));
            }
        }
        ctx.trace.end_span(&span);
        outcome
    }
}

/// What a concrete agent decides. The [`Agent`] wrapper supplies the rest.
#[async_trait]
pub trait AgentBehavior: Send + Sync {
    fn metadata(&self) -> &AgentMetadata;

    /// One-time setup, run at most once per agent
    async fn setup(&self, _services: &AgentServices) -> Result<(), EngineError> {
        Ok(())
    }

    /// Cheap predicate over the task. No model calls.
    async fn can_handle(&self, task: &Task) -> bool;

    async fn build_plan(
        &self,
        task: &Task,
        ctx: &mut ExecutionContext,
        recalled: Option<&RecalledMemory>,
        services: &AgentServices,
    ) -> Result<Plan, EngineError>;

    async fn run_plan(
        &self,
        plan: &Plan,
        ctx: &mut ExecutionContext,
        services: &AgentServices,
    ) -> Result<AgentResult, EngineError>;

    fn validate(&self, result: &AgentResult) -> bool {
        default_validation(result)
    }
}

/// A result is valid when it succeeded and produced output
pub fn default_validation(result: &AgentResult) -> bool {
    result.success && result.output.as_ref().map_or(false, |o| !o.is_null())
}

/// Contents of the first fenced code block, or the whole text trimmed
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after = &trimmed[start + 3..];
    let body_start = after.find('\n').map_or(after.len(), |i| i + 1);
    let body = &after[body_start..];
    match body.find("```") {
        Some(end) => body[..end].trim_end(),
        None => body.trim_end(),
    }
}
