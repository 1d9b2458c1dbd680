//! Episodic memory
//!
//! Replay-oriented records of individual executions, classified into a
//! coarse task type and ranked against new tasks by token overlap.

use sdk::errors::EngineError;
use std::collections::HashSet;
use std::sync::Arc;

use super::{token_overlap, tokenize, Episode, MemoryStore, TaskType};

/// Bonus added to the overlap score when the task types agree
const SAME_TYPE_BONUS: f64 = 0.1;

const API_WORDS: &[&str] = &["api", "endpoint", "endpoints", "rest", "graphql", "route", "routes", "http"];
const TESTING_WORDS: &[&str] = &["test", "tests", "testing", "coverage", "e2e"];
const BUG_WORDS: &[&str] = &["bug", "bugs", "fix", "fixes", "crash", "error", "broken", "regression"];
const REFACTOR_WORDS: &[&str] = &["refactor", "refactoring", "cleanup", "restructure", "simplify", "optimize"];
const FEATURE_WORDS: &[&str] = &["feature", "implement", "add", "build", "create", "support"];

/// Classify free text into a [`TaskType`] by keyword. First match wins.
pub fn classify_task(text: &str) -> TaskType {
    let tokens: HashSet<String> = tokenize(text).into_iter().collect();
    let hit = |words: &[&str]| words.iter().any(|w| tokens.contains(*w));

    if hit(API_WORDS) {
        TaskType::Api
    } else if hit(TESTING_WORDS) {
        TaskType::Testing
    } else if hit(BUG_WORDS) {
        TaskType::BugFix
    } else if hit(REFACTOR_WORDS) {
        TaskType::Refactoring
    } else if hit(FEATURE_WORDS) {
        TaskType::FeatureDevelopment
    } else {
        TaskType::General
    }
}

#[derive(Debug, Clone)]
pub struct ScoredEpisode {
    pub episode: Episode,
    pub score: f64,
}

pub struct EpisodicMemory {
    store: Arc<dyn MemoryStore>,
}

impl EpisodicMemory {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, episode: &Episode) -> Result<(), EngineError> {
        self.store.insert_episode(episode).await
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<Episode>, EngineError> {
        self.store.get_episode(task_id).await
    }

    pub async fn by_agent(&self, agent_id: &str) -> Result<Vec<Episode>, EngineError> {
        self.store.list_episodes(Some(agent_id)).await
    }

    /// Episodes sharing vocabulary with `query`, best first.
    ///
    /// Episodes with no token overlap are never returned.
    pub async fn find_similar(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredEpisode>, EngineError> {
        let query_type = classify_task(query);
        let mut scored: Vec<ScoredEpisode> = self
            .store
            .list_episodes(None)
            .await?
            .into_iter()
            .filter_map(|episode| {
                let overlap = token_overlap(query, &episode.summary);
                if overlap <= 0.0 {
                    return None;
                }
                let bonus = if episode.task_type == query_type {
                    SAME_TYPE_BONUS
                } else {
                    0.0
                };
                Some(ScoredEpisode {
                    score: overlap + bonus,
                    episode,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }
}
