//! Long-term memory
//!
//! Durable task outcomes, learned patterns, and code precedents over a
//! pluggable [`MemoryStore`].

use sdk::errors::EngineError;
use std::sync::Arc;

use super::{token_overlap, CodeSnippet, LearnedPattern, MemoryStore, TaskMemory, TaskMemoryFilter};

pub struct LongTermMemory {
    store: Arc<dyn MemoryStore>,
}

impl LongTermMemory {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }

    pub async fn store_task_memory(&self, memory: &TaskMemory) -> Result<(), EngineError> {
        self.store.insert_task_memory(memory).await
    }

    pub async fn get_task_memory(&self, task_id: &str) -> Result<Option<TaskMemory>, EngineError> {
        self.store.get_task_memory(task_id).await
    }

    pub async fn query(&self, filter: &TaskMemoryFilter) -> Result<Vec<TaskMemory>, EngineError> {
        self.store.query_task_memories(filter).await
    }

    /// Insert or merge a pattern keyed by (type, pattern text)
    pub async fn store_pattern(&self, pattern: LearnedPattern) -> Result<LearnedPattern, EngineError> {
        self.store.merge_pattern(pattern).await
    }

    pub async fn update_pattern_usage(
        &self,
        pattern_id: &str,
        success: bool,
    ) -> Result<Option<LearnedPattern>, EngineError> {
        self.store.update_pattern_usage(pattern_id, success).await
    }

    pub async fn patterns(&self) -> Result<Vec<LearnedPattern>, EngineError> {
        self.store.list_patterns().await
    }

    /// Patterns whose text contains `text`, or is contained by it,
    /// case-insensitively. Highest success rate first.
    pub async fn find_patterns(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<Vec<LearnedPattern>, EngineError> {
        let needle = text.to_lowercase();
        let mut matches: Vec<LearnedPattern> = self
            .store
            .list_patterns()
            .await?
            .into_iter()
            .filter(|p| {
                let pattern = p.pattern.to_lowercase();
                !pattern.is_empty() && (pattern.contains(&needle) || needle.contains(&pattern))
            })
            .collect();
        matches.sort_by(|a, b| b.success_rate.total_cmp(&a.success_rate));
        matches.truncate(limit);
        Ok(matches)
    }

    pub async fn store_code_snippet(&self, snippet: &CodeSnippet) -> Result<(), EngineError> {
        self.store.insert_code_snippet(snippet).await
    }

    /// Snippets whose description or tags share words with `query`
    pub async fn search_code_snippets(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CodeSnippet>, EngineError> {
        let mut scored: Vec<(f64, CodeSnippet)> = self
            .store
            .list_code_snippets()
            .await?
            .into_iter()
            .map(|s| {
                let haystack = format!("{} {}", s.description, s.tags.join(" "));
                (token_overlap(query, &haystack), s)
            })
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored.into_iter().take(limit).map(|(_, s)| s).collect())
    }
}
