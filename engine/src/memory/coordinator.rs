//! Memory coordinator
//!
//! Single entry point for every memory write and for recall. Writes after a
//! task completes are independent and best-effort: one tier failing never
//! prevents the others from being written, and never fails the task.

use anyhow::Result;
use chrono::Utc;
use sdk::errors::EngineError;
use sdk::types::{AgentResult, Task};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    classify_task, CodeSnippet, EmbeddingMetadata, Episode, EpisodicMemory, HashEmbedder, InMemoryStore,
    Interaction, LearnedPattern, LongTermMemory, MemoryStore, MetadataFilter, SemanticMemory,
    SemanticType, ShortTermMemory, SqliteStore, TaskMemory, TaskType,
};
use crate::config::{Config, MemoryBackend, MemoryConfig};
use crate::context::ExecutionContext;

/// Pattern type for plan shapes distilled from successful tasks
pub const WORKFLOW_PATTERN: &str = "workflow";

/// Artifact kinds that are also kept as code precedents
const SNIPPET_KINDS: &[&str] = &["interface", "implementation", "refactor"];

#[derive(Debug, Clone)]
pub struct MemorySettings {
    pub recall_limit: usize,
    pub min_similarity: f32,
    pub pattern_limit: usize,
    pub context_ttl: Duration,
    pub interaction_log_capacity: usize,
    pub embedding_dimensions: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self::from_config(&MemoryConfig::default())
    }
}

impl MemorySettings {
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self {
            recall_limit: config.recall_limit,
            min_similarity: config.min_similarity,
            pattern_limit: config.pattern_limit,
            context_ttl: Duration::from_secs(config.context_ttl_secs),
            interaction_log_capacity: config.interaction_log_capacity,
            embedding_dimensions: config.embedding_dimensions,
        }
    }
}

/// Prior experience relevant to a task
#[derive(Debug, Clone, Default)]
pub struct RecalledMemory {
    pub similar_tasks: Vec<TaskMemory>,
    pub episodes: Vec<Episode>,
    pub patterns: Vec<LearnedPattern>,
}

impl RecalledMemory {
    pub fn is_empty(&self) -> bool {
        self.similar_tasks.is_empty() && self.episodes.is_empty() && self.patterns.is_empty()
    }

    pub fn successful_tasks(&self) -> usize {
        self.similar_tasks.iter().filter(|m| m.success).count()
    }

    /// Plain-text digest for inclusion in a model prompt
    pub fn to_prompt_context(&self) -> String {
        if self.is_empty() {
            return String::new();
        }

        let mut out = String::from("Relevant experience:\n");
        for memory in &self.similar_tasks {
            out.push_str(&format!(
                "- Past task \"{}\" {} ({})\n",
                memory.title,
                if memory.success { "succeeded" } else { "failed" },
                memory.result.reasoning
            ));
        }
        for episode in &self.episodes {
            out.push_str(&format!("- Episode [{}]: {}\n", episode.task_type, episode.outcome));
            for learning in &episode.learnings {
                out.push_str(&format!("  * {}\n", learning));
            }
        }
        for pattern in &self.patterns {
            out.push_str(&format!(
                "- Pattern ({}, success {:.0}%): {} {}\n",
                pattern.pattern_type,
                pattern.success_rate * 100.0,
                pattern.pattern,
                pattern.description
            ));
        }
        out
    }
}

/// What a `remember` call managed to write
#[derive(Debug, Clone, Default)]
pub struct RememberReport {
    pub task_memory: bool,
    pub episode: bool,
    pub embedding: bool,
    pub patterns_updated: usize,
    pub workflow_pattern: bool,
    pub failures: Vec<String>,
}

/// Generated artifact handed over by an agent step
#[derive(Debug, Clone)]
pub struct CodeArtifact {
    pub task_id: String,
    pub agent_id: String,
    pub kind: String,
    pub language: String,
    pub description: String,
    pub content: String,
}

pub struct MemoryCoordinator {
    settings: MemorySettings,
    short_term: ShortTermMemory,
    long_term: LongTermMemory,
    episodic: EpisodicMemory,
    semantic: SemanticMemory,
}

impl MemoryCoordinator {
    pub fn new(store: Arc<dyn MemoryStore>, semantic: SemanticMemory, settings: MemorySettings) -> Self {
        Self {
            short_term: ShortTermMemory::new(settings.context_ttl, settings.interaction_log_capacity),
            long_term: LongTermMemory::new(Arc::clone(&store)),
            episodic: EpisodicMemory::new(store),
            semantic,
            settings,
        }
    }

    /// Volatile coordinator with the hash embedder
    pub fn in_memory(settings: MemorySettings) -> Self {
        let semantic = SemanticMemory::in_memory(settings.embedding_dimensions);
        Self::new(Arc::new(InMemoryStore::new()), semantic, settings)
    }

    /// Build the coordinator for the configured backend
    pub async fn from_config(config: &Config) -> Result<Self> {
        let settings = MemorySettings::from_config(&config.memory);
        let (store, semantic): (Arc<dyn MemoryStore>, SemanticMemory) = match config.memory.backend {
            MemoryBackend::Memory => (
                Arc::new(InMemoryStore::new()),
                SemanticMemory::in_memory(settings.embedding_dimensions),
            ),
            MemoryBackend::Sqlite => {
                let sqlite = SqliteStore::open(&config.database_path()).await?;
                let semantic = SemanticMemory::new(
                    Arc::new(HashEmbedder::new(settings.embedding_dimensions)),
                    Arc::new(sqlite.vector_store()),
                );
                (Arc::new(sqlite), semantic)
            }
        };
        Ok(Self::new(store, semantic, settings))
    }

    pub fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    pub fn long_term(&self) -> &LongTermMemory {
        &self.long_term
    }

    pub fn episodic(&self) -> &EpisodicMemory {
        &self.episodic
    }

    pub fn semantic(&self) -> &SemanticMemory {
        &self.semantic
    }

    pub fn short_term(&self) -> &ShortTermMemory {
        &self.short_term
    }

    /// Persist everything learned from one completed task.
    ///
    /// Each write is attempted regardless of the others; failures are logged
    /// and listed in the report.
    pub async fn remember(
        &self,
        task: &Task,
        result: &AgentResult,
        ctx: &ExecutionContext,
    ) -> RememberReport {
        let mut report = RememberReport::default();
        let agent_id = ctx.agent_id.clone().unwrap_or_else(|| "unassigned".to_string());
        let task_type = classify_task(&task.text());

        let memory = TaskMemory {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task.id.clone(),
            agent_id: agent_id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            plan: ctx.plan.clone(),
            result: result.clone(),
            success: result.success,
            tokens_used: result.tokens_used,
            duration_ms: result.duration_ms,
            created_at: Utc::now(),
        };
        match self.long_term.store_task_memory(&memory).await {
            Ok(()) => report.task_memory = true,
            Err(e) => self.note_failure(&mut report, "task memory", e),
        }

        let episode = build_episode(task, result, ctx, &agent_id, task_type);
        match self.episodic.record(&episode).await {
            Ok(()) => report.episode = true,
            Err(e) => self.note_failure(&mut report, "episode", e),
        }

        let summary = format!(
            "{}\n{}\nOutcome: {}",
            task.title,
            task.description,
            if result.success { "success" } else { "failure" }
        );
        let metadata = EmbeddingMetadata::new(SemanticType::Task, "task_result")
            .with_agent(agent_id.clone())
            .with_task(task.id.clone())
            .with_tags([task_type.to_string()]);
        match self.semantic.store(&summary, metadata).await {
            Ok(_) => report.embedding = true,
            Err(e) => self.note_failure(&mut report, "embedding", e),
        }

        for pattern_id in &ctx.recalled_pattern_ids {
            match self
                .long_term
                .update_pattern_usage(pattern_id, result.success)
                .await
            {
                Ok(Some(_)) => report.patterns_updated += 1,
                Ok(None) => debug!("Recalled pattern {} no longer exists", pattern_id),
                Err(e) => self.note_failure(&mut report, "pattern usage", e),
            }
        }

        if let Some(pattern) = distill_workflow(task, result, ctx, task_type) {
            match self.long_term.store_pattern(pattern).await {
                Ok(_) => report.workflow_pattern = true,
                Err(e) => self.note_failure(&mut report, "workflow pattern", e),
            }
        }

        report
    }

    fn note_failure(&self, report: &mut RememberReport, tier: &str, error: EngineError) {
        warn!("Memory write failed ({}): {}", tier, error);
        report
            .failures
            .push(EngineError::MemoryWriteFailure(format!("{}: {}", tier, error)).to_string());
    }

    /// Prior experience for `task`: up to `limit` similar task memories and
    /// episodes, plus matching patterns.
    pub async fn recall(&self, task: &Task, limit: usize) -> Result<RecalledMemory, EngineError> {
        let query = task.text();
        let hits = self
            .semantic
            .search_similar(&query, limit, &MetadataFilter::of_type(SemanticType::Task))
            .await?;

        let mut seen = HashSet::new();
        let mut similar_tasks = Vec::new();
        for hit in hits {
            if hit.similarity <= self.settings.min_similarity {
                continue;
            }
            let Some(task_id) = hit.record.metadata.task_id else {
                continue;
            };
            if !seen.insert(task_id.clone()) {
                continue;
            }
            if let Some(memory) = self.long_term.get_task_memory(&task_id).await? {
                similar_tasks.push(memory);
            }
        }

        let episodes = self
            .episodic
            .find_similar(&query, limit)
            .await?
            .into_iter()
            .map(|scored| scored.episode)
            .collect();

        let patterns = self
            .long_term
            .find_patterns(&query, self.settings.pattern_limit)
            .await?;

        Ok(RecalledMemory {
            similar_tasks,
            episodes,
            patterns,
        })
    }

    /// Keep an execution snapshot in short-term memory for the context TTL
    pub async fn store_context_snapshot(&self, session_id: &str, agent_id: &str, snapshot: Value) {
        let key = format!("context:{}:{}", session_id, agent_id);
        self.short_term.set(key, snapshot).await;
    }

    pub async fn context_snapshot(&self, session_id: &str, agent_id: &str) -> Option<Value> {
        self.short_term
            .get(&format!("context:{}:{}", session_id, agent_id))
            .await
    }

    /// Embed a generated artifact and, for code kinds, keep it as a precedent
    pub async fn store_artifact(&self, artifact: &CodeArtifact) -> Result<(), EngineError> {
        let metadata = EmbeddingMetadata::new(SemanticType::Code, artifact.kind.clone())
            .with_agent(artifact.agent_id.clone())
            .with_task(artifact.task_id.clone())
            .with_tags([artifact.kind.clone(), artifact.language.clone()]);
        let embedded = self.semantic.store(&artifact.content, metadata).await;

        let snippet = if SNIPPET_KINDS.contains(&artifact.kind.as_str()) {
            let snippet = CodeSnippet {
                id: uuid::Uuid::new_v4().to_string(),
                task_id: Some(artifact.task_id.clone()),
                language: artifact.language.clone(),
                description: artifact.description.clone(),
                code: artifact.content.clone(),
                tags: vec![artifact.kind.clone()],
                created_at: Utc::now(),
            };
            self.long_term.store_code_snippet(&snippet).await
        } else {
            Ok(())
        };

        embedded.and(snippet)
    }

    pub async fn search_code_snippets(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CodeSnippet>, EngineError> {
        self.long_term.search_code_snippets(query, limit).await
    }

    pub async fn store_pattern(&self, pattern: LearnedPattern) -> Result<LearnedPattern, EngineError> {
        self.long_term.store_pattern(pattern).await
    }

    pub async fn update_pattern_usage(
        &self,
        pattern_id: &str,
        success: bool,
    ) -> Result<Option<LearnedPattern>, EngineError> {
        self.long_term.update_pattern_usage(pattern_id, success).await
    }

    pub async fn mark_agent_active(&self, agent_id: &str) {
        self.short_term.mark_active(agent_id).await;
    }

    pub async fn mark_agent_inactive(&self, agent_id: &str) {
        self.short_term.mark_inactive(agent_id).await;
    }

    pub async fn active_agents(&self) -> Vec<String> {
        self.short_term.active_agents().await
    }

    pub async fn record_interaction(&self, interaction: Interaction) {
        self.short_term.record_interaction(interaction).await;
    }
}

fn build_episode(
    task: &Task,
    result: &AgentResult,
    ctx: &ExecutionContext,
    agent_id: &str,
    task_type: TaskType,
) -> Episode {
    let steps = match &ctx.plan {
        Some(plan) => plan
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let status = match result.sub_results.get(i) {
                    Some(sub) if sub.success => "ok",
                    Some(_) => "failed",
                    None => "not run",
                };
                format!("{} {} [{}]", step.id, step.description, status)
            })
            .collect(),
        None => result.sub_results.iter().map(|r| r.reasoning.clone()).collect(),
    };

    let mut decisions: Vec<String> = ctx
        .plan
        .iter()
        .filter(|p| !p.reasoning.is_empty())
        .map(|p| format!("plan: {}", p.reasoning))
        .collect();
    for span in &ctx.trace.spans {
        for event in &span.events {
            decisions.push(format!("{}: {}", span.operation, event.name));
        }
    }

    Episode {
        id: uuid::Uuid::new_v4().to_string(),
        task_id: task.id.clone(),
        agent_id: agent_id.to_string(),
        task_type,
        summary: task.text(),
        start_time: ctx.trace.start_time,
        end_time: Utc::now(),
        success: result.success,
        steps,
        decisions,
        outcome: result.reasoning.clone(),
        learnings: extract_learnings(result, ctx, task_type),
    }
}

fn extract_learnings(result: &AgentResult, ctx: &ExecutionContext, task_type: TaskType) -> Vec<String> {
    let mut learnings = Vec::new();
    let step_count = ctx.plan.as_ref().map_or(0, |p| p.steps.len());

    if result.success {
        learnings.push(format!(
            "A {}-step plan succeeded for a {} task",
            step_count, task_type
        ));
    } else {
        learnings.push(format!("Failed: {}", result.reasoning));
    }
    for failed in result.sub_results.iter().filter(|r| !r.success) {
        learnings.push(format!("Step failed: {}", failed.reasoning));
    }
    learnings
}

/// Plan shape worth reusing: successful tasks with more than one step
fn distill_workflow(
    task: &Task,
    result: &AgentResult,
    ctx: &ExecutionContext,
    task_type: TaskType,
) -> Option<LearnedPattern> {
    let plan = ctx.plan.as_ref()?;
    let title = task.title.trim().to_lowercase();
    if !result.success || plan.steps.len() < 2 || title.is_empty() {
        return None;
    }

    let shape = plan
        .steps
        .iter()
        .map(|s| s.kind.as_str())
        .collect::<Vec<_>>()
        .join(" -> ");
    Some(
        LearnedPattern::new(
            WORKFLOW_PATTERN,
            title,
            format!("{} plan: {}", task_type, shape),
            1.0,
        )
        .with_example(task.id.clone()),
    )
}
