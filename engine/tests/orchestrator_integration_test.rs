//! End-to-end orchestration tests
//!
//! Drive `TaskOrchestrator::process_task` against a scripted model provider
//! and check routing, traces, memory side effects and failure handling.

mod common;

use common::{orchestrator, orchestrator_with, services, Reply, ScriptedProvider, LOGIN_PLAN};
use async_trait::async_trait;
use hive_engine::agent::{AgentBehavior, AgentServices, CodeAgent};
use hive_engine::context::ExecutionContext;
use hive_engine::llm::Message;
use hive_engine::memory::RecalledMemory;
use sdk::errors::EngineError;
use sdk::types::{AgentMetadata, AgentResult, AgentType, Plan};
use hive_engine::bus::HistoryFilter;
use hive_engine::llm::LLMError;
use hive_engine::memory::WORKFLOW_PATTERN;
use hive_engine::orchestrator::TaskOrchestrator;
use sdk::types::{MessageType, Task};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn login_task() -> Task {
    Task::new("Build login API", "Implement POST /login with session tokens")
        .with_metadata("complexity", json!("high"))
}

fn rate_limiter_task() -> Task {
    Task::new(
        "Implement a rate limiter function",
        "Token bucket with a configurable refill rate",
    )
}

#[tokio::test]
async fn test_complex_task_routes_to_director() {
    let llm = Arc::new(ScriptedProvider::new("step output").with_replies([
        Reply::text(LOGIN_PLAN),
        Reply::text("contract"),
        Reply::text("handler"),
        Reply::text("tests"),
        Reply::text("Login API delivered"),
    ]));
    let orchestrator = orchestrator(llm.clone()).await;

    let outcome = orchestrator.process_task(login_task()).await;

    assert_eq!(outcome.agent_id.as_deref(), Some("director"));
    assert!(outcome.result.success, "{}", outcome.result.reasoning);
    assert!(outcome.validated);
    assert_eq!(outcome.result.sub_results.len(), 3);
    assert_eq!(
        outcome.result.output.as_ref().unwrap()["summary"],
        json!("Login API delivered")
    );
    assert!(outcome.tokens_used > 0);
    assert_eq!(llm.calls(), 5);

    let trace = &outcome.trace;
    assert_eq!(trace.open_spans(), 0);
    assert!(trace.end_time.is_some());
    assert_eq!(trace.spans_named("Director.plan").count(), 1);
    assert_eq!(trace.spans_named("Director.execute").count(), 1);
    assert_eq!(trace.spans_named("Director.step").count(), 3);

    let plan_span = trace.spans_named("Director.plan").next().unwrap();
    assert_eq!(plan_span.attributes["plan.steps"], json!(3));
    assert_eq!(plan_span.attributes["plan.confidence"], json!(0.8));

    let root = trace.spans_named("Orchestrator.process_task").next().unwrap();
    assert!(root.parent_id.is_none());
    assert_eq!(plan_span.parent_id.as_deref(), Some(root.id.as_str()));
}

#[tokio::test]
async fn test_director_step_prompts_carry_dependency_output() {
    let llm = Arc::new(ScriptedProvider::new("final").with_replies([
        Reply::text(LOGIN_PLAN),
        Reply::text("CONTRACT-OUTPUT"),
        Reply::text("handler"),
    ]));
    let orchestrator = orchestrator(llm.clone()).await;

    orchestrator.process_task(login_task()).await;

    let prompts = llm.user_prompts();
    // plan, step-1, step-2
    assert!(prompts[2].contains("Result of step-1:\nCONTRACT-OUTPUT"));
    assert!(!prompts[1].contains("Result of"));
}

#[tokio::test]
async fn test_aggregation_keeps_plan_order() {
    let plan = r#"{"steps": [
        {"id": "zeta", "description": "first thing"},
        {"id": "alpha", "description": "second thing", "dependencies": ["zeta"]}
    ], "confidence": 0.7}"#;
    let llm = Arc::new(ScriptedProvider::new("summary").with_replies([
        Reply::text(plan),
        Reply::text("FIRST-OUT"),
        Reply::text("SECOND-OUT"),
    ]));
    let orchestrator = orchestrator(llm.clone()).await;

    let outcome = orchestrator.process_task(login_task()).await;
    assert!(outcome.result.success, "{}", outcome.result.reasoning);

    let prompts = llm.user_prompts();
    let aggregate = &prompts[3];
    let first = aggregate.find("FIRST-OUT").unwrap();
    let second = aggregate.find("SECOND-OUT").unwrap();
    assert!(first < second, "{}", aggregate);

    let steps = &outcome.result.output.as_ref().unwrap()["steps"];
    assert_eq!(steps[0]["id"], json!("zeta"));
    assert_eq!(steps[1]["id"], json!("alpha"));
    assert_eq!(steps[1]["output"], json!("SECOND-OUT"));
}

#[tokio::test]
async fn test_director_announces_each_step_on_the_bus() {
    let llm = Arc::new(ScriptedProvider::new("done").with_replies([Reply::text(LOGIN_PLAN)]));
    let orchestrator = orchestrator(llm).await;
    let mut observer = orchestrator.bus().subscribe_channel("observer").await;

    orchestrator.process_task(login_task()).await;

    let updates = orchestrator
        .bus()
        .history(&HistoryFilter::default().message_type(MessageType::StatusUpdate))
        .await;
    assert_eq!(updates.len(), 3);
    assert!(updates.iter().all(|m| m.from == "director"));

    let mut received = 0;
    while let Ok(message) = observer.try_recv() {
        assert_eq!(message.message_type, MessageType::StatusUpdate);
        received += 1;
    }
    assert_eq!(received, 3);
}

#[tokio::test]
async fn test_unparseable_plan_falls_back_to_single_step() {
    let llm = Arc::new(ScriptedProvider::new("done").with_replies([Reply::text(
        "I would start by thinking about the login flow.",
    )]));
    let orchestrator = orchestrator(llm).await;

    let outcome = orchestrator.process_task(login_task()).await;

    assert!(outcome.result.success);
    assert_eq!(outcome.result.sub_results.len(), 1);

    let plan_span = outcome.trace.spans_named("Director.plan").next().unwrap();
    assert_eq!(plan_span.attributes["plan.confidence"], json!(0.5));
    assert!(plan_span.events.iter().any(|e| e.name == "plan.fallback"));
}

#[tokio::test]
async fn test_failed_step_skips_the_rest() {
    let llm = Arc::new(ScriptedProvider::new("unused").with_replies([
        Reply::text(LOGIN_PLAN),
        Reply::text("contract"),
        Reply::Fail(LLMError::NetworkError("connection reset".to_string())),
    ]));
    let orchestrator = orchestrator(llm.clone()).await;

    let outcome = orchestrator.process_task(login_task()).await;

    assert!(!outcome.result.success);
    assert!(!outcome.validated);
    assert_eq!(outcome.result.sub_results.len(), 2);
    assert!(outcome.result.sub_results[0].success);
    assert!(!outcome.result.sub_results[1].success);
    assert!(outcome.result.reasoning.contains("1 remaining step(s) skipped"));
    // plan, step-1, step-2; no aggregation call
    assert_eq!(llm.calls(), 3);
    assert_eq!(outcome.trace.open_spans(), 0);
}

#[tokio::test]
async fn test_no_suitable_agent() {
    let llm = Arc::new(ScriptedProvider::new("unused"));
    let orchestrator = TaskOrchestrator::new(services(llm.clone()), 4);
    orchestrator.register(CodeAgent::new("code").unwrap()).await;

    let task = Task::new("Plan the team offsite", "Pick a venue and dates");
    let outcome = orchestrator.process_task(task).await;

    assert!(outcome.agent_id.is_none());
    assert!(!outcome.result.success);
    assert!(outcome.result.reasoning.contains("No suitable agent"));
    assert_eq!(llm.calls(), 0);

    let root = outcome
        .trace
        .spans_named("Orchestrator.process_task")
        .next()
        .unwrap();
    assert!(!root.is_open());
    assert!(root.events.iter().any(|e| e.name == "selection.failed"));
}

#[tokio::test]
async fn test_unavailable_provider_fails_before_planning() {
    let llm = Arc::new(ScriptedProvider::new("unused"));
    llm.set_available(false);
    let orchestrator = orchestrator(llm.clone()).await;

    let outcome = orchestrator.process_task(login_task()).await;

    assert!(!outcome.result.success);
    assert!(outcome.result.reasoning.contains("unavailable"));
    assert_eq!(outcome.agent_id.as_deref(), Some("director"));
    assert_eq!(outcome.trace.spans_named("Director.plan").count(), 0);
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn test_model_timeout_closes_every_span() {
    let llm = Arc::new(ScriptedProvider::new("unused").with_replies([Reply::Hang]));
    let services = services(llm).with_model_timeout(Duration::from_millis(50));
    let orchestrator = orchestrator_with(services).await;

    let outcome = orchestrator.process_task(login_task()).await;

    assert!(!outcome.result.success);
    assert!(outcome.result.reasoning.starts_with("Planning failed"));
    assert!(outcome.result.reasoning.contains("timed out"));
    assert_eq!(outcome.trace.open_spans(), 0);

    let model_span = outcome.trace.spans_named("Director.model").next().unwrap();
    assert!(model_span.events.iter().any(|e| e.name == "model.error"));
    let plan_span = outcome.trace.spans_named("Director.plan").next().unwrap();
    assert!(plan_span.events.iter().any(|e| e.name == "plan.error"));
}

#[tokio::test]
async fn test_code_task_produces_artifacts_and_learns_workflow() {
    let llm = Arc::new(ScriptedProvider::new("```rust\nfn acquire() -> bool { true }\n```"));
    let orchestrator = orchestrator(llm.clone()).await;

    let task = rate_limiter_task();
    let task_id = task.id.clone();
    let outcome = orchestrator.process_task(task).await;

    assert_eq!(outcome.agent_id.as_deref(), Some("code"));
    assert!(outcome.result.success, "{}", outcome.result.reasoning);
    assert!(outcome.validated);
    // interface, implementation, test
    assert_eq!(llm.calls(), 3);

    let output = outcome.result.output.as_ref().unwrap();
    assert_eq!(output["language"], json!("rust"));
    assert_eq!(
        output["artifacts"]["implementation"],
        json!("fn acquire() -> bool { true }")
    );

    let memory = orchestrator.memory();
    let stored = memory.long_term().get_task_memory(&task_id).await.unwrap().unwrap();
    assert!(stored.success);
    assert_eq!(stored.agent_id, "code");
    assert!(memory.episodic().get(&task_id).await.unwrap().is_some());

    let snippets = memory.search_code_snippets("rate limiter", 5).await.unwrap();
    assert!(!snippets.is_empty());

    let patterns = memory.long_term().patterns().await.unwrap();
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].pattern_type, WORKFLOW_PATTERN);
    assert_eq!(patterns[0].pattern, "implement a rate limiter function");
    assert!(patterns[0].description.contains("interface -> implementation -> test"));

    assert!(memory.active_agents().await.is_empty());
}

#[tokio::test]
async fn test_second_run_reuses_learned_workflow() {
    let llm = Arc::new(ScriptedProvider::new("```rust\nfn acquire() -> bool { true }\n```"));
    let orchestrator = orchestrator(llm).await;

    let first = orchestrator.process_task(rate_limiter_task()).await;
    let second = orchestrator.process_task(rate_limiter_task()).await;
    assert!(first.result.success && second.result.success);

    let first_plan = first.trace.spans_named("Code.plan").next().unwrap();
    let second_plan = second.trace.spans_named("Code.plan").next().unwrap();
    assert_eq!(first_plan.attributes["plan.steps"], json!(3));
    // apply_pattern joins the plan once the workflow pattern is recalled
    assert_eq!(second_plan.attributes["plan.steps"], json!(4));
    assert!(
        second_plan.attributes["plan.confidence"].as_f64().unwrap()
            > first_plan.attributes["plan.confidence"].as_f64().unwrap()
    );

    let patterns = orchestrator.memory().long_term().patterns().await.unwrap();
    assert_eq!(patterns.len(), 1);
    // stored, used once, re-stored
    assert_eq!(patterns[0].usage_count, 3);
    assert!((patterns[0].success_rate - 1.0).abs() < 1e-9);
    assert_eq!(patterns[0].examples.len(), 2);
}

#[tokio::test]
async fn test_unclaimed_task_falls_back_to_director() {
    let llm = Arc::new(ScriptedProvider::new("done"));
    let orchestrator = orchestrator(llm).await;

    let task = Task::new("Plan the team offsite", "Pick a venue and dates");
    let outcome = orchestrator.process_task(task).await;

    assert_eq!(outcome.agent_id.as_deref(), Some("director"));
    // "done" is not a plan, so the single-step fallback runs
    assert!(outcome.result.success);
    assert_eq!(outcome.result.sub_results.len(), 1);
}

/// Consults the model, then rejects what it said
struct PickyPlanner {
    metadata: AgentMetadata,
}

#[async_trait]
impl AgentBehavior for PickyPlanner {
    fn metadata(&self) -> &AgentMetadata {
        &self.metadata
    }

    async fn can_handle(&self, _task: &Task) -> bool {
        true
    }

    async fn build_plan(
        &self,
        task: &Task,
        ctx: &mut ExecutionContext,
        _recalled: Option<&RecalledMemory>,
        services: &AgentServices,
    ) -> Result<Plan, EngineError> {
        services
            .invoke_model(&self.metadata, ctx, &[Message::user(task.title.clone())])
            .await?;
        Err(EngineError::PlanParseFailure("no usable steps".to_string()))
    }

    async fn run_plan(
        &self,
        _plan: &Plan,
        _ctx: &mut ExecutionContext,
        _services: &AgentServices,
    ) -> Result<AgentResult, EngineError> {
        Ok(AgentResult::failure("unreachable"))
    }
}

#[tokio::test]
async fn test_planning_failure_reports_tokens_spent() {
    let llm = Arc::new(ScriptedProvider::new("twelve characters of text here"));
    let orchestrator = TaskOrchestrator::new(services(llm.clone()), 4);
    orchestrator
        .register(PickyPlanner {
            metadata: AgentMetadata::new("picky", "Picky", AgentType::General),
        })
        .await;

    let outcome = orchestrator.process_task(Task::new("Anything", "")).await;

    assert!(!outcome.result.success);
    assert!(outcome.result.reasoning.starts_with("Planning failed"));
    assert_eq!(llm.calls(), 1);
    assert!(outcome.tokens_used > 0);
    assert_eq!(outcome.result.tokens_used, outcome.tokens_used);
}

#[tokio::test]
async fn test_agent_stays_active_until_its_last_task_ends() {
    let llm = Arc::new(ScriptedProvider::new("```rust\nfn f() {}\n```").slow_when("SLOWPOKE", Duration::from_millis(150)));
    let orchestrator = orchestrator(llm).await;

    let long_task = Task::new("Implement the SLOWPOKE function", "Runs for a while");
    let quick_task = Task::new("Implement a quick function", "Returns at once");

    let (long, (quick, during)) = tokio::join!(orchestrator.process_task(long_task), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let quick = orchestrator.process_task(quick_task).await;
        (quick, orchestrator.get_status().await)
    });

    assert_eq!(quick.agent_id.as_deref(), Some("code"));
    assert_eq!(long.agent_id.as_deref(), Some("code"));
    assert_eq!(during.active_agents, vec!["code".to_string()]);
    assert!(orchestrator.get_status().await.active_agents.is_empty());
}

#[tokio::test]
async fn test_traces_are_retrievable_by_session() {
    let llm = Arc::new(ScriptedProvider::new("```rust\nfn main() {}\n```"));
    let orchestrator = orchestrator(llm).await;

    let (a, b) = tokio::join!(
        orchestrator.process_task(rate_limiter_task()),
        orchestrator.process_task(Task::new("Fix the parser bug", "Off-by-one in the lexer")),
    );

    assert_ne!(a.session_id, b.session_id);
    assert_eq!(orchestrator.get_trace(&a.session_id).await, Some(a.trace.clone()));
    assert_eq!(orchestrator.get_trace(&b.session_id).await, Some(b.trace.clone()));
    assert!(orchestrator.get_trace("no-such-session").await.is_none());

    let status = orchestrator.get_status().await;
    assert_eq!(status.registry.total, 2);
    assert_eq!(status.provider, "scripted");
    assert_eq!(status.traces_retained, 2);
    assert!(status.active_agents.is_empty());
}
