//! Layered Memory
//!
//! Four independent tiers feed the recall loop that biases future plans:
//!
//! - [`ShortTermMemory`]: ephemeral keyed context with TTL, active agents,
//!   and a capped recent-interaction log
//! - [`LongTermMemory`]: durable task outcomes, learned patterns, and code
//!   precedents
//! - [`EpisodicMemory`]: replay-oriented records of individual executions
//! - [`SemanticMemory`]: embeddings ranked by cosine similarity
//!
//! The [`MemoryCoordinator`] composes the tiers and is the only writer.
//! Durable records go through the [`MemoryStore`] trait so the storage engine
//! can be swapped ([`InMemoryStore`] or [`SqliteStore`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::types::{AgentResult, Plan};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod coordinator;
pub mod episodic;
pub mod long_term;
pub mod semantic;
pub mod short_term;
pub mod sqlite;
pub mod store;

pub use coordinator::{
    CodeArtifact, MemoryCoordinator, MemorySettings, RecalledMemory, RememberReport,
    WORKFLOW_PATTERN,
};
pub use episodic::{classify_task, EpisodicMemory, ScoredEpisode};
pub use long_term::LongTermMemory;
pub use semantic::{
    cosine_similarity, Embedder, EmbeddingMetadata, EmbeddingRecord, HashEmbedder,
    InMemoryVectorStore, MetadataFilter, ScoredRecord, SemanticMemory, SemanticType, VectorStore,
};
pub use short_term::{Interaction, ShortTermMemory};
pub use sqlite::{SqliteStore, SqliteVectorStore};
pub use store::InMemoryStore;

/// Smoothing factor for usage-driven pattern success rates
pub const PATTERN_SMOOTHING: f64 = 0.1;

/// Durable record of one completed task. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMemory {
    pub id: String,
    pub task_id: String,
    pub agent_id: String,
    pub title: String,
    pub description: String,
    pub plan: Option<Plan>,
    pub result: AgentResult,
    pub success: bool,
    pub tokens_used: u64,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Generalized, reusable solution shape distilled from successful tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub id: String,
    pub pattern_type: String,
    pub pattern: String,
    pub description: String,
    /// References to the tasks the pattern was seen in
    pub examples: Vec<String>,
    pub success_rate: f64,
    pub usage_count: u64,
    pub last_used: DateTime<Utc>,
}

impl LearnedPattern {
    pub fn new(
        pattern_type: impl Into<String>,
        pattern: impl Into<String>,
        description: impl Into<String>,
        success_rate: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pattern_type: pattern_type.into(),
            pattern: pattern.into(),
            description: description.into(),
            examples: Vec::new(),
            success_rate: success_rate.clamp(0.0, 1.0),
            usage_count: 1,
            last_used: Utc::now(),
        }
    }

    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    /// Fold a re-stored copy of this pattern into it.
    ///
    /// Usage count increments, examples are unioned without duplicates, and
    /// the success rate becomes the simple mean of the two values.
    pub fn merge_from(&mut self, incoming: &LearnedPattern) {
        self.usage_count += 1;
        for example in &incoming.examples {
            if !self.examples.contains(example) {
                self.examples.push(example.clone());
            }
        }
        self.success_rate = (self.success_rate + incoming.success_rate) / 2.0;
        if self.description.is_empty() {
            self.description = incoming.description.clone();
        }
        self.last_used = Utc::now();
    }

    /// Apply one usage outcome as an exponential moving average
    pub fn record_usage(&mut self, success: bool) {
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate =
            PATTERN_SMOOTHING * outcome + (1.0 - PATTERN_SMOOTHING) * self.success_rate;
        self.usage_count += 1;
        self.last_used = Utc::now();
    }

    /// Same (type, pattern text) pair
    pub fn same_shape(&self, other: &LearnedPattern) -> bool {
        self.pattern_type == other.pattern_type && self.pattern == other.pattern
    }
}

/// Coarse task classification used by the episodic tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Api,
    Testing,
    BugFix,
    Refactoring,
    FeatureDevelopment,
    General,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskType::Api => "api",
            TaskType::Testing => "testing",
            TaskType::BugFix => "bug_fix",
            TaskType::Refactoring => "refactoring",
            TaskType::FeatureDevelopment => "feature_development",
            TaskType::General => "general",
        };
        write!(f, "{}", name)
    }
}

/// Replay-oriented record of one task's execution. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub task_id: String,
    pub agent_id: String,
    pub task_type: TaskType,
    /// Title and description of the task, used for similarity ranking
    pub summary: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub success: bool,
    pub steps: Vec<String>,
    pub decisions: Vec<String>,
    pub outcome: String,
    pub learnings: Vec<String>,
}

/// Code precedent produced by a generation step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSnippet {
    pub id: String,
    pub task_id: Option<String>,
    pub language: String,
    pub description: String,
    pub code: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Query over stored task memories. All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct TaskMemoryFilter {
    pub agent_id: Option<String>,
    pub success: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Case-insensitive substring of the title
    pub title_contains: Option<String>,
    pub limit: Option<usize>,
}

impl TaskMemoryFilter {
    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn title_contains(mut self, needle: impl Into<String>) -> Self {
        self.title_contains = Some(needle.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, memory: &TaskMemory) -> bool {
        if let Some(agent_id) = &self.agent_id {
            if &memory.agent_id != agent_id {
                return false;
            }
        }
        if let Some(success) = self.success {
            if memory.success != success {
                return false;
            }
        }
        if let Some(since) = self.since {
            if memory.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if memory.created_at > until {
                return false;
            }
        }
        if let Some(needle) = &self.title_contains {
            if !memory.title.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// Durable storage for task memories, patterns, episodes and code snippets.
///
/// Implementations must make `merge_pattern` and `update_pattern_usage`
/// atomic with respect to concurrent writers.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn insert_task_memory(&self, memory: &TaskMemory) -> Result<(), EngineError>;

    /// Most recent memory recorded for a task id
    async fn get_task_memory(&self, task_id: &str) -> Result<Option<TaskMemory>, EngineError>;

    /// Matching memories, newest first
    async fn query_task_memories(
        &self,
        filter: &TaskMemoryFilter,
    ) -> Result<Vec<TaskMemory>, EngineError>;

    /// Insert the pattern, or merge it into the stored pattern with the same
    /// (type, pattern text). Returns the stored result.
    async fn merge_pattern(&self, pattern: LearnedPattern) -> Result<LearnedPattern, EngineError>;

    /// Apply a usage outcome. Returns `None` for an unknown id.
    async fn update_pattern_usage(
        &self,
        pattern_id: &str,
        success: bool,
    ) -> Result<Option<LearnedPattern>, EngineError>;

    async fn list_patterns(&self) -> Result<Vec<LearnedPattern>, EngineError>;

    async fn insert_episode(&self, episode: &Episode) -> Result<(), EngineError>;

    async fn get_episode(&self, task_id: &str) -> Result<Option<Episode>, EngineError>;

    /// Episodes in insertion order, optionally restricted to one agent
    async fn list_episodes(&self, agent_id: Option<&str>) -> Result<Vec<Episode>, EngineError>;

    async fn insert_code_snippet(&self, snippet: &CodeSnippet) -> Result<(), EngineError>;

    async fn list_code_snippets(&self) -> Result<Vec<CodeSnippet>, EngineError>;
}

/// Lowercased alphanumeric tokens of at least two characters
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Jaccard overlap of the token sets of two texts
pub(crate) fn token_overlap(a: &str, b: &str) -> f64 {
    use std::collections::HashSet;
    let a: HashSet<String> = tokenize(a).into_iter().collect();
    let b: HashSet<String> = tokenize(b).into_iter().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    shared / union
}
