//! Director Agent
//!
//! Handles complex, multi-part tasks. Planning asks the model for a JSON
//! breakdown; execution runs the steps in order, one model call each, then
//! aggregates the step outputs with a final call.
//!
//! # Plan format
//!
//! ```json
//! {
//!   "steps": [
//!     {"id": "step-1", "description": "...", "agentType": "code",
//!      "dependencies": [], "expectedOutput": "..."}
//!   ],
//!   "estimatedTotalMinutes": 45,
//!   "confidence": 0.8,
//!   "reasoning": "..."
//! }
//! ```
//!
//! Output that cannot be parsed into a valid plan falls back to a single step
//! covering the whole task.

use async_trait::async_trait;
use regex::Regex;
use sdk::errors::EngineError;
use sdk::types::{
    AgentMessage, AgentMetadata, AgentResult, AgentType, MessageType, Plan, PlanStep, Task,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

use super::{AgentBehavior, AgentServices};
use crate::context::ExecutionContext;
use crate::llm::{extract_json_object, Message};
use crate::memory::RecalledMemory;
use crate::trace::attrs;

/// Confidence assigned to the single-step fallback plan
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

const DEFAULT_CONFIDENCE: f64 = 0.7;
const MINUTES_PER_STEP: u32 = 15;

const PLANNING_PROMPT: &str = "You are the Director agent of a multi-agent engineering team. \
Break the task into a short ordered list of concrete steps. Reply with a single JSON object: \
{\"steps\": [{\"id\": string, \"description\": string, \"agentType\": \
\"code\"|\"research\"|\"qa\"|\"general\", \"dependencies\": [ids of earlier steps], \
\"expectedOutput\": string}], \"estimatedTotalMinutes\": number, \"confidence\": number between 0 and 1, \
\"reasoning\": string}. Reply with JSON only.";

const STEP_PROMPT: &str = "You are executing one step of a larger plan. \
Produce the step's deliverable directly and concisely.";

const AGGREGATE_PROMPT: &str = "You are the Director agent. Combine the step results below \
into a final answer for the task. Be concise.";

/// Why model output could not become a plan
#[derive(Error, Debug, PartialEq)]
pub enum PlanParseError {
    #[error("no JSON object in model output")]
    NoJson,

    #[error("invalid plan JSON: {0}")]
    InvalidJson(String),

    #[error("plan has no steps")]
    EmptyPlan,

    #[error("invalid plan structure: {0}")]
    InvalidStructure(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPlan {
    steps: Vec<RawStep>,
    #[serde(default, alias = "estimated_total_minutes")]
    estimated_total_minutes: Option<f64>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStep {
    #[serde(default)]
    id: Option<String>,
    description: String,
    #[serde(default, alias = "agent_type")]
    agent_type: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default, alias = "expected_output")]
    expected_output: Option<String>,
}

/// Output of one completed step, kept in execution order
#[derive(Debug, Clone, Serialize)]
struct StepOutput {
    id: String,
    output: String,
}

/// Parse model output into a validated plan
pub fn parse_plan(content: &str) -> Result<Plan, PlanParseError> {
    let json = extract_json_object(content).ok_or(PlanParseError::NoJson)?;
    let raw: RawPlan =
        serde_json::from_str(json).map_err(|e| PlanParseError::InvalidJson(e.to_string()))?;

    if raw.steps.is_empty() {
        return Err(PlanParseError::EmptyPlan);
    }

    let steps: Vec<PlanStep> = raw
        .steps
        .into_iter()
        .enumerate()
        .map(|(i, step)| PlanStep {
            id: step
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("step-{}", i + 1)),
            expected_output: step
                .expected_output
                .unwrap_or_else(|| format!("Result of: {}", step.description)),
            description: step.description,
            agent_type: step
                .agent_type
                .as_deref()
                .map_or(AgentType::General, AgentType::parse_lenient),
            kind: "general".to_string(),
            dependencies: step.dependencies,
        })
        .collect();

    let estimated = raw
        .estimated_total_minutes
        .filter(|m| m.is_finite() && *m > 0.0)
        .map_or(steps.len() as u32 * MINUTES_PER_STEP, |m| m.round() as u32);

    let plan = Plan {
        steps,
        estimated_duration_minutes: estimated,
        confidence: raw
            .confidence
            .filter(|c| c.is_finite())
            .map_or(DEFAULT_CONFIDENCE, |c| c.clamp(0.0, 1.0)),
        reasoning: raw.reasoning.unwrap_or_default(),
    };
    plan.validate().map_err(PlanParseError::InvalidStructure)?;
    Ok(plan)
}

/// Single step covering the whole task
pub fn fallback_plan(task: &Task) -> Plan {
    let description = if task.description.trim().is_empty() {
        task.title.clone()
    } else {
        task.description.clone()
    };
    Plan {
        steps: vec![PlanStep {
            id: "step-1".to_string(),
            description,
            agent_type: AgentType::General,
            kind: "general".to_string(),
            dependencies: Vec::new(),
            expected_output: format!("Completed: {}", task.title),
        }],
        estimated_duration_minutes: 2 * MINUTES_PER_STEP,
        confidence: FALLBACK_CONFIDENCE,
        reasoning: "Model output could not be parsed into a plan; running the task as one step"
            .to_string(),
    }
}

pub struct DirectorAgent {
    metadata: AgentMetadata,
    keywords: Regex,
}

impl DirectorAgent {
    pub fn new(id: impl Into<String>) -> anyhow::Result<Self> {
        let keywords = Regex::new(
            r"(?i)\b(complex|multi[- ]?step|multiple|coordinat\w*|orchestrat\w*|architecture|end[- ]to[- ]end|full[- ]stack|workflow|integrat\w*|project|system)\b",
        )?;
        Ok(Self {
            metadata: AgentMetadata::new(id, "Director", AgentType::Director)
                .with_capabilities(["planning", "coordination", "decomposition"])
                .with_max_concurrent_tasks(5),
            keywords,
        })
    }

    fn planning_messages(&self, task: &Task, recalled: Option<&RecalledMemory>) -> Vec<Message> {
        let mut user = format!("Task: {}\n\n{}", task.title, task.description);
        if !task.metadata.is_empty() {
            user.push_str(&format!("\n\nMetadata: {}", Value::Object(task.metadata.clone())));
        }
        if let Some(context) = recalled.map(|r| r.to_prompt_context()).filter(|c| !c.is_empty()) {
            user.push_str("\n\n");
            user.push_str(&context);
        }
        vec![Message::system(PLANNING_PROMPT), Message::user(user)]
    }

    fn step_messages(&self, task: &Task, step: &PlanStep, outputs: &[StepOutput]) -> Vec<Message> {
        let mut user = format!(
            "Overall task: {}\n\nStep {}: {}\nExpected output: {}",
            task.title, step.id, step.description, step.expected_output
        );
        for dep in &step.dependencies {
            if let Some(done) = outputs.iter().find(|o| &o.id == dep) {
                user.push_str(&format!("\n\nResult of {}:\n{}", dep, done.output));
            }
        }
        vec![Message::system(STEP_PROMPT), Message::user(user)]
    }

    async fn announce(&self, services: &AgentServices, ctx: &ExecutionContext, step: &PlanStep, success: bool) {
        let status = AgentMessage::broadcast(
            self.metadata.id.clone(),
            MessageType::StatusUpdate,
            json!({
                "session_id": ctx.session_id,
                "task_id": ctx.task.id,
                "step_id": step.id,
                "success": success,
            }),
        );
        let report = services.bus.broadcast(status).await;
        debug!(
            "Status for {} delivered to {} agent(s), {} failed",
            step.id, report.delivered, report.failed
        );
    }
}

#[async_trait]
impl AgentBehavior for DirectorAgent {
    fn metadata(&self) -> &AgentMetadata {
        &self.metadata
    }

    async fn can_handle(&self, task: &Task) -> bool {
        task.metadata_str("complexity")
            .map_or(false, |c| c.eq_ignore_ascii_case("high"))
            || self.keywords.is_match(&task.title)
            || self.keywords.is_match(&task.description)
    }

    async fn build_plan(
        &self,
        task: &Task,
        ctx: &mut ExecutionContext,
        recalled: Option<&RecalledMemory>,
        services: &AgentServices,
    ) -> Result<Plan, EngineError> {
        let messages = self.planning_messages(task, recalled);
        let output = services.invoke_model(&self.metadata, ctx, &messages).await?;

        match parse_plan(&output.text) {
            Ok(plan) => Ok(plan),
            Err(e) => {
                warn!("Director plan unparseable, using fallback: {}", e);
                if let Some(span) = ctx.trace.current_span() {
                    ctx.trace
                        .add_event(&span, "plan.fallback", attrs([("reason", json!(e.to_string()))]));
                }
                Ok(fallback_plan(task))
            }
        }
    }

    async fn run_plan(
        &self,
        plan: &Plan,
        ctx: &mut ExecutionContext,
        services: &AgentServices,
    ) -> Result<AgentResult, EngineError> {
        let task = ctx.task.clone();
        let mut outputs: Vec<StepOutput> = Vec::with_capacity(plan.steps.len());
        let mut sub_results = Vec::with_capacity(plan.steps.len());
        let mut aborted: Option<(String, EngineError)> = None;

        for step in &plan.steps {
            let started = Instant::now();
            let span = ctx
                .trace
                .start_span(&self.metadata.id, format!("{}.step", self.metadata.name));
            ctx.trace.set_attribute(&span, "step.id", json!(step.id));

            let messages = self.step_messages(&task, step, &outputs);
            let outcome = services.invoke_model(&self.metadata, ctx, &messages).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(output) => {
                    let success = !output.text.trim().is_empty();
                    let result = if success {
                        AgentResult::success(json!(output.text), format!("Step {} completed", step.id))
                    } else {
                        AgentResult::failure(format!("Step {} produced no output", step.id))
                    };
                    sub_results.push(result.with_tokens(output.tokens).with_duration(duration_ms));
                    outputs.push(StepOutput {
                        id: step.id.clone(),
                        output: output.text.clone(),
                    });
                    ctx.trace.set_attribute(&span, "success", json!(success));
                    ctx.trace.end_span(&span);
                    self.announce(services, ctx, step, success).await;
                }
                Err(e) => {
                    sub_results.push(
                        AgentResult::failure(format!("Step {} failed: {}", step.id, e))
                            .with_duration(duration_ms),
                    );
                    ctx.trace
                        .add_event(&span, "step.error", attrs([("error", json!(e.to_string()))]));
                    ctx.trace.end_span(&span);
                    self.announce(services, ctx, step, false).await;
                    aborted = Some((step.id.clone(), e));
                    break;
                }
            }
        }

        let step_tokens: u64 = sub_results.iter().map(|r| r.tokens_used).sum();

        if let Some((step_id, error)) = aborted {
            let skipped = plan.steps.len() - sub_results.len();
            let mut result = AgentResult::failure(format!(
                "Step {} failed: {}; {} remaining step(s) skipped",
                step_id, error, skipped
            ))
            .with_tokens(step_tokens)
            .with_sub_results(sub_results);
            result.output = Some(json!({ "steps": outputs }));
            return Ok(result);
        }

        let steps_ok = sub_results.iter().all(|r| r.success);
        let mut digest = format!("Task: {}\n{}\n", task.title, task.description);
        for done in &outputs {
            digest.push_str(&format!("\n[{}]\n{}\n", done.id, done.output));
        }
        let messages = vec![Message::system(AGGREGATE_PROMPT), Message::user(digest)];

        let result = match services.invoke_model(&self.metadata, ctx, &messages).await {
            Ok(summary) => {
                let output = json!({ "summary": summary.text, "steps": outputs });
                let reasoning = if steps_ok {
                    format!("Completed {} step(s)", plan.steps.len())
                } else {
                    "One or more steps produced no output".to_string()
                };
                AgentResult {
                    success: steps_ok,
                    output: Some(output),
                    reasoning,
                    tokens_used: step_tokens + summary.tokens,
                    duration_ms: 0,
                    sub_results,
                }
            }
            Err(e) => {
                let mut result = AgentResult::failure(format!("Aggregation failed: {}", e))
                    .with_tokens(step_tokens)
                    .with_sub_results(sub_results);
                result.output = Some(json!({ "steps": outputs }));
                result
            }
        };
        Ok(result)
    }
}
