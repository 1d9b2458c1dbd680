//! Code Agent
//!
//! Plans follow a fixed shape, adjusted by what memory recalls:
//!
//! ```text
//! interface -> implementation -> [apply_pattern] -> test -> [refactor]
//! ```
//!
//! `apply_pattern` is added when reusable patterns were recalled, `refactor`
//! when an optimization pattern was. Each step kind has its own prompt; the
//! step's artifact is embedded into semantic memory and, for code kinds,
//! kept as a precedent.

use async_trait::async_trait;
use regex::Regex;
use sdk::errors::EngineError;
use sdk::types::{AgentMetadata, AgentResult, AgentType, Plan, PlanStep, Task};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, warn};

use super::{default_validation, strip_code_fence, AgentBehavior, AgentServices};
use crate::context::ExecutionContext;
use crate::llm::Message;
use crate::memory::{CodeArtifact, LearnedPattern, RecalledMemory};
use crate::trace::attrs;

/// Pattern type that triggers a refactor step
pub const OPTIMIZATION_PATTERN: &str = "optimization";

const MAX_CONFIDENCE: f64 = 0.95;
const SNIPPET_LOOKUP_LIMIT: usize = 5;
const MINUTES_PER_STEP: u32 = 10;
const DEFAULT_LANGUAGE: &str = "rust";
const KNOWN_LANGUAGES: &[&str] = &[
    "rust", "python", "typescript", "javascript", "go", "java", "kotlin", "swift", "c", "cpp",
];

const SYSTEM_PROMPT: &str = "You are the Code agent of a multi-agent engineering team. \
Write production-quality code. Reply with a single fenced code block and nothing else.";

/// Executable step kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Interface,
    Implementation,
    ApplyPattern,
    Test,
    Refactor,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Interface => "interface",
            StepKind::Implementation => "implementation",
            StepKind::ApplyPattern => "apply_pattern",
            StepKind::Test => "test",
            StepKind::Refactor => "refactor",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interface" => Ok(StepKind::Interface),
            "implementation" => Ok(StepKind::Implementation),
            "apply_pattern" => Ok(StepKind::ApplyPattern),
            "test" => Ok(StepKind::Test),
            "refactor" => Ok(StepKind::Refactor),
            other => Err(format!("unrecognized step kind '{}'", other)),
        }
    }
}

/// Plan confidence from recalled experience.
///
/// Starts at 0.5, adds 0.1 per successful similar task, up to 0.15 each for
/// patterns and snippets, and never exceeds 0.95.
pub fn plan_confidence(successful_tasks: usize, patterns: usize, snippets: usize) -> f64 {
    let confidence = 0.5
        + 0.1 * successful_tasks as f64
        + (0.05 * patterns as f64).min(0.15)
        + (0.05 * snippets as f64).min(0.15);
    confidence.min(MAX_CONFIDENCE)
}

fn is_optimization(pattern: &LearnedPattern) -> bool {
    pattern.pattern_type == OPTIMIZATION_PATTERN
}

pub struct CodeAgent {
    metadata: AgentMetadata,
    keywords: Regex,
}

impl CodeAgent {
    pub fn new(id: impl Into<String>) -> anyhow::Result<Self> {
        let keywords = Regex::new(
            r"(?i)\b(code|implement\w*|function|class|method|module|refactor\w*|bug|fix|debug|tests?|api|endpoint|compile|script|library|interface|struct|typescript|rust|python|javascript)\b",
        )?;
        Ok(Self {
            metadata: AgentMetadata::new(id, "Code", AgentType::Code)
                .with_capabilities(["code_generation", "testing", "refactoring"])
                .with_max_concurrent_tasks(3),
            keywords,
        })
    }

    fn language(task: &Task) -> String {
        if let Some(language) = task.metadata_str("language") {
            return language.to_lowercase();
        }
        let text = task.text().to_lowercase();
        let words: HashSet<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        KNOWN_LANGUAGES
            .iter()
            .find(|l| words.contains(**l))
            .map_or(DEFAULT_LANGUAGE.to_string(), |l| l.to_string())
    }

    fn step_prompt(
        kind: StepKind,
        task: &Task,
        step: &PlanStep,
        language: &str,
        artifacts: &Map<String, Value>,
        patterns: &[String],
    ) -> String {
        let artifact = |k: StepKind| artifacts.get(k.as_str()).and_then(|v| v.as_str()).unwrap_or("");
        let header = format!(
            "Task: {}\n{}\nLanguage: {}\n\n{}",
            task.title, task.description, language, step.description
        );
        match kind {
            StepKind::Interface => format!(
                "{}\n\nDefine the public types and function signatures only.",
                header
            ),
            StepKind::Implementation => format!(
                "{}\n\nImplement this interface in full:\n{}",
                header,
                artifact(StepKind::Interface)
            ),
            StepKind::ApplyPattern => format!(
                "{}\n\nRevise the implementation to follow these proven patterns:\n- {}\n\nImplementation:\n{}",
                header,
                patterns.join("\n- "),
                artifact(StepKind::Implementation)
            ),
            StepKind::Test => format!(
                "{}\n\nWrite unit tests for this implementation:\n{}",
                header,
                latest_code(artifacts)
            ),
            StepKind::Refactor => format!(
                "{}\n\nRefactor for performance and clarity without changing behaviour:\n{}",
                header,
                latest_code(artifacts)
            ),
        }
    }

    fn push_step(
        steps: &mut Vec<PlanStep>,
        kind: StepKind,
        description: String,
        expected_output: &str,
        depends_on: &[usize],
    ) -> usize {
        let index = steps.len();
        let dependencies = depends_on.iter().map(|i| steps[*i].id.clone()).collect();
        steps.push(PlanStep {
            id: format!("step-{}", index + 1),
            description,
            agent_type: AgentType::Code,
            kind: kind.as_str().to_string(),
            dependencies,
            expected_output: expected_output.to_string(),
        });
        index
    }
}

/// Most refined code produced so far
fn latest_code(artifacts: &Map<String, Value>) -> &str {
    [StepKind::ApplyPattern, StepKind::Implementation]
        .iter()
        .find_map(|k| artifacts.get(k.as_str()).and_then(|v| v.as_str()))
        .unwrap_or("")
}

#[async_trait]
impl AgentBehavior for CodeAgent {
    fn metadata(&self) -> &AgentMetadata {
        &self.metadata
    }

    async fn can_handle(&self, task: &Task) -> bool {
        self.keywords.is_match(&task.title) || self.keywords.is_match(&task.description)
    }

    async fn build_plan(
        &self,
        task: &Task,
        ctx: &mut ExecutionContext,
        recalled: Option<&RecalledMemory>,
        services: &AgentServices,
    ) -> Result<Plan, EngineError> {
        let snippets = match services
            .memory
            .search_code_snippets(&task.text(), SNIPPET_LOOKUP_LIMIT)
            .await
        {
            Ok(snippets) => snippets,
            Err(e) => {
                warn!("Code snippet lookup failed: {}", e);
                Vec::new()
            }
        };

        let empty = RecalledMemory::default();
        let recalled = recalled.unwrap_or(&empty);
        let (optimizations, reusable): (Vec<&LearnedPattern>, Vec<&LearnedPattern>) =
            recalled.patterns.iter().partition(|p| is_optimization(p));

        let mut steps = Vec::new();
        let interface = Self::push_step(
            &mut steps,
            StepKind::Interface,
            format!("Design the interface for {}", task.title),
            "Type and function signatures",
            &[],
        );
        let mut last = Self::push_step(
            &mut steps,
            StepKind::Implementation,
            format!("Implement {}", task.title),
            "Working implementation",
            &[interface],
        );
        if !reusable.is_empty() {
            last = Self::push_step(
                &mut steps,
                StepKind::ApplyPattern,
                format!("Apply {} recalled pattern(s)", reusable.len()),
                "Implementation aligned with proven patterns",
                &[last],
            );
        }
        last = Self::push_step(
            &mut steps,
            StepKind::Test,
            format!("Write tests for {}", task.title),
            "Unit tests covering the implementation",
            &[last],
        );
        if !optimizations.is_empty() {
            Self::push_step(
                &mut steps,
                StepKind::Refactor,
                "Refactor using recalled optimizations".to_string(),
                "Optimized implementation",
                &[last],
            );
        }

        let confidence = plan_confidence(recalled.successful_tasks(), recalled.patterns.len(), snippets.len());
        ctx.shared.insert("language".to_string(), json!(Self::language(task)));
        ctx.shared.insert(
            "patterns".to_string(),
            json!(reusable
                .iter()
                .map(|p| format!("{} ({})", p.pattern, p.description))
                .collect::<Vec<_>>()),
        );
        ctx.shared.insert(
            "precedents".to_string(),
            json!(snippets.iter().map(|s| s.description.clone()).collect::<Vec<_>>()),
        );

        Ok(Plan {
            estimated_duration_minutes: steps.len() as u32 * MINUTES_PER_STEP,
            reasoning: format!(
                "{} successful similar task(s), {} pattern(s), {} snippet(s) recalled",
                recalled.successful_tasks(),
                recalled.patterns.len(),
                snippets.len()
            ),
            steps,
            confidence,
        })
    }

    async fn run_plan(
        &self,
        plan: &Plan,
        ctx: &mut ExecutionContext,
        services: &AgentServices,
    ) -> Result<AgentResult, EngineError> {
        let task = ctx.task.clone();
        let language = ctx
            .shared
            .get("language")
            .and_then(|v| v.as_str())
            .map_or_else(|| Self::language(&task), str::to_string);
        let patterns: Vec<String> = ctx
            .shared
            .get("patterns")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|p| p.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let mut artifacts = Map::new();
        let mut failed_steps: HashSet<String> = HashSet::new();
        let mut sub_results = Vec::with_capacity(plan.steps.len());

        for step in &plan.steps {
            let started = Instant::now();

            if let Some(dep) = step.dependencies.iter().find(|d| failed_steps.contains(*d)) {
                sub_results.push(AgentResult::failure(format!(
                    "Step {} skipped: dependency {} failed",
                    step.id, dep
                )));
                failed_steps.insert(step.id.clone());
                continue;
            }

            let kind = match step.kind.parse::<StepKind>() {
                Ok(kind) => kind,
                Err(reason) => {
                    warn!("Code agent cannot run step {}: {}", step.id, reason);
                    sub_results.push(AgentResult::failure(format!("Step {}: {}", step.id, reason)));
                    failed_steps.insert(step.id.clone());
                    continue;
                }
            };

            let prompt = Self::step_prompt(kind, &task, step, &language, &artifacts, &patterns);
            let messages = vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)];

            match services.invoke_model(&self.metadata, ctx, &messages).await {
                Ok(output) => {
                    let code = strip_code_fence(&output.text).to_string();
                    if code.is_empty() {
                        sub_results.push(
                            AgentResult::failure(format!("Step {} produced no code", step.id))
                                .with_tokens(output.tokens),
                        );
                        failed_steps.insert(step.id.clone());
                        continue;
                    }

                    let artifact = CodeArtifact {
                        task_id: task.id.clone(),
                        agent_id: self.metadata.id.clone(),
                        kind: kind.to_string(),
                        language: language.clone(),
                        description: format!("{}: {}", task.title, step.description),
                        content: code.clone(),
                    };
                    if let Err(e) = services.memory.store_artifact(&artifact).await {
                        warn!("Failed to store {} artifact: {}", kind, e);
                    }

                    debug!("Code step {} ({}) produced {} bytes", step.id, kind, code.len());
                    artifacts.insert(kind.to_string(), json!(code));
                    sub_results.push(
                        AgentResult::success(json!(code), format!("{} complete", kind))
                            .with_tokens(output.tokens)
                            .with_duration(started.elapsed().as_millis() as u64),
                    );
                }
                Err(e) => {
                    if let Some(span) = ctx.trace.current_span() {
                        ctx.trace.add_event(
                            &span,
                            "step.error",
                            attrs([("step", json!(step.id)), ("error", json!(e.to_string()))]),
                        );
                    }
                    sub_results.push(
                        AgentResult::failure(format!("Step {} failed: {}", step.id, e))
                            .with_duration(started.elapsed().as_millis() as u64),
                    );
                    failed_steps.insert(step.id.clone());
                }
            }
        }

        let success = sub_results.iter().all(|r| r.success);
        let tokens: u64 = sub_results.iter().map(|r| r.tokens_used).sum();
        let reasoning = if success {
            format!("Generated {} artifact(s) in {}", artifacts.len(), language)
        } else {
            format!(
                "{} of {} step(s) failed",
                sub_results.iter().filter(|r| !r.success).count(),
                sub_results.len()
            )
        };

        Ok(AgentResult {
            success,
            output: Some(json!({ "language": language, "artifacts": artifacts })),
            reasoning,
            tokens_used: tokens,
            duration_ms: 0,
            sub_results,
        })
    }

    /// Valid only when an implementation was produced
    fn validate(&self, result: &AgentResult) -> bool {
        default_validation(result)
            && result
                .output
                .as_ref()
                .and_then(|o| o.pointer("/artifacts/implementation"))
                .and_then(|v| v.as_str())
                .map_or(false, |code| !code.trim().is_empty())
    }
}
