//! In-process memory store
//!
//! Keeps every record behind a single `RwLock`. Pattern merges and usage
//! updates run under the write lock, so concurrent writers cannot lose an
//! update.

use async_trait::async_trait;
use sdk::errors::EngineError;
use tokio::sync::RwLock;

use super::{CodeSnippet, Episode, LearnedPattern, MemoryStore, TaskMemory, TaskMemoryFilter};

#[derive(Default)]
struct Records {
    task_memories: Vec<TaskMemory>,
    patterns: Vec<LearnedPattern>,
    episodes: Vec<Episode>,
    code_snippets: Vec<CodeSnippet>,
}

/// Volatile [`MemoryStore`] backed by vectors
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<Records>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn insert_task_memory(&self, memory: &TaskMemory) -> Result<(), EngineError> {
        self.records.write().await.task_memories.push(memory.clone());
        Ok(())
    }

    async fn get_task_memory(&self, task_id: &str) -> Result<Option<TaskMemory>, EngineError> {
        let records = self.records.read().await;
        Ok(records
            .task_memories
            .iter()
            .rev()
            .find(|m| m.task_id == task_id)
            .cloned())
    }

    async fn query_task_memories(
        &self,
        filter: &TaskMemoryFilter,
    ) -> Result<Vec<TaskMemory>, EngineError> {
        let records = self.records.read().await;
        let mut matches: Vec<TaskMemory> = records
            .task_memories
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    async fn merge_pattern(&self, pattern: LearnedPattern) -> Result<LearnedPattern, EngineError> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.patterns.iter_mut().find(|p| p.same_shape(&pattern)) {
            existing.merge_from(&pattern);
            return Ok(existing.clone());
        }
        records.patterns.push(pattern.clone());
        Ok(pattern)
    }

    async fn update_pattern_usage(
        &self,
        pattern_id: &str,
        success: bool,
    ) -> Result<Option<LearnedPattern>, EngineError> {
        let mut records = self.records.write().await;
        Ok(records
            .patterns
            .iter_mut()
            .find(|p| p.id == pattern_id)
            .map(|p| {
                p.record_usage(success);
                p.clone()
            }))
    }

    async fn list_patterns(&self) -> Result<Vec<LearnedPattern>, EngineError> {
        Ok(self.records.read().await.patterns.clone())
    }

    async fn insert_episode(&self, episode: &Episode) -> Result<(), EngineError> {
        self.records.write().await.episodes.push(episode.clone());
        Ok(())
    }

    async fn get_episode(&self, task_id: &str) -> Result<Option<Episode>, EngineError> {
        let records = self.records.read().await;
        Ok(records
            .episodes
            .iter()
            .rev()
            .find(|e| e.task_id == task_id)
            .cloned())
    }

    async fn list_episodes(&self, agent_id: Option<&str>) -> Result<Vec<Episode>, EngineError> {
        let records = self.records.read().await;
        Ok(records
            .episodes
            .iter()
            .filter(|e| agent_id.map_or(true, |id| e.agent_id == id))
            .cloned()
            .collect())
    }

    async fn insert_code_snippet(&self, snippet: &CodeSnippet) -> Result<(), EngineError> {
        self.records.write().await.code_snippets.push(snippet.clone());
        Ok(())
    }

    async fn list_code_snippets(&self) -> Result<Vec<CodeSnippet>, EngineError> {
        Ok(self.records.read().await.code_snippets.clone())
    }
}
