//! Agent lifecycle
//!
//! Wraps an [`AgentBehavior`] with the steps every agent shares:
//!
//! 1. Initialize once (concurrent callers wait for the same setup)
//! 2. Plan inside a `<Name>.plan` span, after a best-effort recall
//! 3. Execute inside a `<Name>.execute` span; failures become a failed result
//! 4. Validate
//!
//! Spans are always closed, whichever way a phase ends.

use sdk::errors::EngineError;
use sdk::types::{AgentMetadata, AgentResult, AgentType, Plan, Task};
use serde_json::json;
use std::time::Instant;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use super::{AgentBehavior, AgentServices};
use crate::context::ExecutionContext;
use crate::trace::attrs;

/// Lifecycle state of the agent's most recent run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Uninitialized,
    Initialized,
    Planning,
    Executing,
    Validated,
    Failed,
}

pub struct Agent {
    behavior: Box<dyn AgentBehavior>,
    services: AgentServices,
    initialized: OnceCell<()>,
    state: RwLock<AgentState>,
}

impl Agent {
    pub fn new(behavior: impl AgentBehavior + 'static, services: AgentServices) -> Self {
        Self {
            behavior: Box::new(behavior),
            services,
            initialized: OnceCell::new(),
            state: RwLock::new(AgentState::Uninitialized),
        }
    }

    pub fn metadata(&self) -> &AgentMetadata {
        self.behavior.metadata()
    }

    pub fn id(&self) -> &str {
        &self.metadata().id
    }

    pub fn name(&self) -> &str {
        &self.metadata().name
    }

    pub fn agent_type(&self) -> AgentType {
        self.metadata().agent_type
    }

    pub async fn state(&self) -> AgentState {
        *self.state.read().await
    }

    async fn set_state(&self, state: AgentState) {
        *self.state.write().await = state;
    }

    /// Run one-time setup. Idempotent; a failed setup may be retried.
    pub async fn initialize(&self) -> Result<(), EngineError> {
        self.initialized
            .get_or_try_init(|| async {
                debug!("Initializing agent {}", self.id());
                self.behavior
                    .setup(&self.services)
                    .await
                    .map_err(|e| EngineError::AgentInitialization {
                        agent_id: self.id().to_string(),
                        reason: e.to_string(),
                    })
            })
            .await?;
        self.set_state(AgentState::Initialized).await;
        Ok(())
    }

    pub async fn can_handle(&self, task: &Task) -> bool {
        self.behavior.can_handle(task).await
    }

    /// Produce a plan for `task`.
    ///
    /// Recall failures are logged and planning continues without memory.
    pub async fn plan(&self, task: &Task, ctx: &mut ExecutionContext) -> Result<Plan, EngineError> {
        self.initialize().await?;
        self.set_state(AgentState::Planning).await;

        let span = ctx
            .trace
            .start_span(self.id(), format!("{}.plan", self.name()));

        let limit = self.services.memory.settings().recall_limit;
        let recalled = match self.services.memory.recall(task, limit).await {
            Ok(recalled) => {
                ctx.trace.add_event(
                    &span,
                    "recall",
                    attrs([
                        ("similar_tasks", json!(recalled.similar_tasks.len())),
                        ("episodes", json!(recalled.episodes.len())),
                        ("patterns", json!(recalled.patterns.len())),
                    ]),
                );
                for pattern in &recalled.patterns {
                    ctx.note_pattern(&pattern.id);
                }
                Some(recalled)
            }
            Err(e) => {
                warn!("Recall failed for task {}: {}", task.id, e);
                ctx.trace
                    .add_event(&span, "recall.failed", attrs([("error", json!(e.to_string()))]));
                None
            }
        };

        let outcome = self
            .behavior
            .build_plan(task, ctx, recalled.as_ref(), &self.services)
            .await;

        match &outcome {
            Ok(plan) => {
                ctx.trace
                    .set_attribute(&span, "plan.steps", json!(plan.steps.len()));
                ctx.trace
                    .set_attribute(&span, "plan.confidence", json!(plan.confidence));
                info!(
                    "{} planned {} step(s) for task {} (confidence {:.2})",
                    self.name(),
                    plan.steps.len(),
                    task.id,
                    plan.confidence
                );
            }
            Err(e) => {
                ctx.trace
                    .add_event(&span, "plan.error", attrs([("error", json!(e.to_string()))]));
                self.set_state(AgentState::Failed).await;
            }
        }
        ctx.trace.end_span(&span);
        outcome
    }

    /// Execute `plan`. Never returns an error: a failure becomes a failed
    /// result carrying the tokens spent and the elapsed time.
    pub async fn execute(&self, plan: &Plan, ctx: &mut ExecutionContext) -> AgentResult {
        self.set_state(AgentState::Executing).await;
        ctx.agent_id = Some(self.id().to_string());
        ctx.plan = Some(plan.clone());

        let started = Instant::now();
        let tokens_before = ctx.tokens_used;
        let span = ctx
            .trace
            .start_span(self.id(), format!("{}.execute", self.name()));

        let outcome = self.behavior.run_plan(plan, ctx, &self.services).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let tokens_spent = ctx.tokens_used - tokens_before;

        let result = match outcome {
            Ok(mut result) => {
                if result.tokens_used == 0 {
                    result.tokens_used = tokens_spent;
                }
                result.duration_ms = duration_ms;
                result
            }
            Err(e) => {
                warn!("{} execution failed: {}", self.name(), e);
                ctx.trace
                    .add_event(&span, "execute.error", attrs([("error", json!(e.to_string()))]));
                AgentResult::failure(format!("Execution failed: {}", e))
                    .with_tokens(tokens_spent)
                    .with_duration(duration_ms)
            }
        };

        ctx.trace
            .set_attribute(&span, "success", json!(result.success));
        ctx.trace
            .set_attribute(&span, "tokens", json!(result.tokens_used));
        ctx.trace.end_span(&span);

        if !result.success {
            self.set_state(AgentState::Failed).await;
        }

        self.services
            .memory
            .store_context_snapshot(&ctx.session_id, self.id(), ctx.snapshot())
            .await;

        result
    }

    pub async fn validate(&self, result: &AgentResult) -> bool {
        let valid = self.behavior.validate(result);
        self.set_state(if valid {
            AgentState::Validated
        } else {
            AgentState::Failed
        })
        .await;
        valid
    }
}
