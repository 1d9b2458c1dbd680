//! Task orchestrator
//!
//! Entry point for running a task end to end:
//!
//! 1. select an agent from the registry
//! 2. check the model provider is reachable
//! 3. plan, execute, validate
//! 4. hand the outcome to memory (best-effort)
//!
//! `process_task` never returns an error. Every failure becomes a failed
//! [`TaskOutcome`] that still carries the session trace.

use anyhow::Result;
use chrono::Utc;
use sdk::errors::EngineError;
use sdk::types::{AgentResult, Task};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::agent::{Agent, AgentServices, CodeAgent, DirectorAgent};
use crate::bus::{BusStats, CommunicationBus};
use crate::config::Config;
use crate::context::ExecutionContext;
use crate::llm::LLMProvider;
use crate::memory::{Interaction, MemoryCoordinator};
use crate::registry::{AgentRegistry, RegistryStats};
use crate::trace::{attrs, Trace};

/// Agent id used for orchestrator-level spans
pub const ORCHESTRATOR_ID: &str = "orchestrator";

/// Default number of finished traces kept for `get_trace`
pub const DEFAULT_TRACE_RETENTION: usize = 256;

/// Everything a caller learns about one processed task
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub session_id: String,
    pub task_id: String,
    pub agent_id: Option<String>,
    pub result: AgentResult,
    pub validated: bool,
    /// Tokens across planning and execution
    pub tokens_used: u64,
    pub trace: Trace,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub registry: RegistryStats,
    pub bus: BusStats,
    pub active_agents: Vec<String>,
    pub provider: String,
    pub traces_retained: usize,
}

/// Bounded session-id -> trace map, oldest evicted first
struct TraceArchive {
    capacity: usize,
    order: VecDeque<String>,
    traces: HashMap<String, Trace>,
}

impl TraceArchive {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            traces: HashMap::new(),
        }
    }

    fn insert(&mut self, session_id: String, trace: Trace) {
        if self.traces.insert(session_id.clone(), trace).is_none() {
            self.order.push_back(session_id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.traces.remove(&oldest);
            }
        }
    }
}

pub struct TaskOrchestrator {
    registry: Arc<AgentRegistry>,
    services: AgentServices,
    traces: Mutex<TraceArchive>,
}

impl TaskOrchestrator {
    pub fn new(services: AgentServices, trace_retention: usize) -> Self {
        Self {
            registry: Arc::new(AgentRegistry::new()),
            services,
            traces: Mutex::new(TraceArchive::new(trace_retention)),
        }
    }

    /// Build memory and bus from config and register the Director and Code agents
    pub async fn from_config(config: &Config, llm: Arc<dyn LLMProvider>) -> Result<Self> {
        let memory = Arc::new(MemoryCoordinator::from_config(config).await?);
        let bus = Arc::new(CommunicationBus::new(config.bus.history_capacity));
        let services = AgentServices::new(llm, memory, bus)
            .with_model_timeout(Duration::from_secs(config.llm.timeout_secs));

        let orchestrator = Self::new(services, config.orchestrator.trace_retention);
        orchestrator
            .register(DirectorAgent::new("director")?)
            .await;
        orchestrator.register(CodeAgent::new("code")?).await;
        Ok(orchestrator)
    }

    /// Services shared with every registered agent
    pub fn services(&self) -> &AgentServices {
        &self.services
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn bus(&self) -> &CommunicationBus {
        &self.services.bus
    }

    pub fn memory(&self) -> &MemoryCoordinator {
        &self.services.memory
    }

    /// Wrap `behavior` with the shared services and register it
    pub async fn register(&self, behavior: impl crate::agent::AgentBehavior + 'static) -> bool {
        self.registry
            .register(Agent::new(behavior, self.services.clone()))
            .await
    }

    pub async fn process_task(&self, task: Task) -> TaskOutcome {
        info!("Processing task {}: {}", task.id, task.title);
        let mut ctx = ExecutionContext::new(task.clone());

        let span = ctx
            .trace
            .start_span(ORCHESTRATOR_ID, "Orchestrator.process_task");
        ctx.trace.set_attribute(&span, "task.id", json!(task.id));

        let (result, validated) = self.run(&task, &mut ctx, &span).await;

        ctx.trace
            .set_attribute(&span, "validated", json!(validated));
        ctx.trace.end_span(&span);
        ctx.trace.finish();

        self.traces
            .lock()
            .await
            .insert(ctx.session_id.clone(), ctx.trace.clone());

        info!(
            "Task {} finished: success={} validated={} tokens={}",
            task.id, result.success, validated, ctx.tokens_used
        );

        TaskOutcome {
            session_id: ctx.session_id,
            task_id: task.id,
            agent_id: ctx.agent_id,
            result,
            validated,
            tokens_used: ctx.tokens_used,
            trace: ctx.trace,
        }
    }

    async fn run(&self, task: &Task, ctx: &mut ExecutionContext, span: &str) -> (AgentResult, bool) {
        let Some(agent) = self.registry.select_for_task(task).await else {
            let error = EngineError::NoSuitableAgent(task.id.clone());
            warn!("{}", error);
            ctx.trace
                .add_event(span, "selection.failed", attrs([("error", json!(error.to_string()))]));
            return (AgentResult::failure(error.to_string()), false);
        };

        ctx.agent_id = Some(agent.id().to_string());
        ctx.trace.add_event(
            span,
            "agent.selected",
            attrs([
                ("agent_id", json!(agent.id())),
                ("agent_type", json!(agent.agent_type().to_string())),
            ]),
        );

        if !self.services.llm.is_available().await {
            let error = EngineError::ProviderUnavailable(self.services.llm.name().to_string());
            warn!("{}", error);
            ctx.trace
                .add_event(span, "provider.unavailable", attrs([("error", json!(error.to_string()))]));
            return (AgentResult::failure(error.to_string()), false);
        }

        let memory = &self.services.memory;
        memory.mark_agent_active(agent.id()).await;

        let (result, validated) = match agent.plan(task, ctx).await {
            Ok(plan) => {
                ctx.plan = Some(plan.clone());
                let result = agent.execute(&plan, ctx).await;
                let validated = agent.validate(&result).await;
                (result, validated)
            }
            Err(e) => {
                warn!("Planning failed for task {}: {}", task.id, e);
                let failed = AgentResult::failure(format!("Planning failed: {}", e))
                    .with_tokens(ctx.tokens_used);
                (failed, false)
            }
        };

        let report = memory.remember(task, &result, ctx).await;
        if !report.failures.is_empty() {
            ctx.trace.add_event(
                span,
                "memory.partial",
                attrs([("failures", json!(report.failures))]),
            );
        }

        memory
            .record_interaction(Interaction {
                session_id: ctx.session_id.clone(),
                agent_id: agent.id().to_string(),
                task_id: task.id.clone(),
                success: result.success,
                timestamp: Utc::now(),
            })
            .await;
        memory.mark_agent_inactive(agent.id()).await;

        (result, validated)
    }

    pub async fn get_status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            registry: self.registry.stats().await,
            bus: self.services.bus.stats().await,
            active_agents: self.services.memory.active_agents().await,
            provider: self.services.llm.name().to_string(),
            traces_retained: self.traces.lock().await.traces.len(),
        }
    }

    /// Finished trace of a session, while still retained
    pub async fn get_trace(&self, session_id: &str) -> Option<Trace> {
        self.traces.lock().await.traces.get(session_id).cloned()
    }
}
