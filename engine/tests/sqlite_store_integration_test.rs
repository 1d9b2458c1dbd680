//! SQLite memory backend tests
//!
//! Every test opens a fresh database in a temporary directory.

use chrono::{Duration, Utc};
use hive_engine::memory::{
    CodeSnippet, EmbeddingMetadata, Episode, HashEmbedder, LearnedPattern, MemoryStore,
    MetadataFilter, SemanticMemory, SemanticType, SqliteStore, TaskMemory, TaskMemoryFilter,
    TaskType, VectorStore,
};
use sdk::types::AgentResult;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

async fn open_store() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("memory").join("hive.db"))
        .await
        .unwrap();
    (dir, store)
}

fn task_memory(task_id: &str, agent_id: &str, title: &str, success: bool) -> TaskMemory {
    let result = if success {
        AgentResult::success(json!("ok"), "done")
    } else {
        AgentResult::failure("broken")
    };
    TaskMemory {
        id: uuid::Uuid::new_v4().to_string(),
        task_id: task_id.to_string(),
        agent_id: agent_id.to_string(),
        title: title.to_string(),
        description: String::new(),
        plan: None,
        result,
        success,
        tokens_used: 42,
        duration_ms: 10,
        created_at: Utc::now(),
    }
}

fn episode(task_id: &str, agent_id: &str) -> Episode {
    Episode {
        id: uuid::Uuid::new_v4().to_string(),
        task_id: task_id.to_string(),
        agent_id: agent_id.to_string(),
        task_type: TaskType::Api,
        summary: "Build login API".to_string(),
        start_time: Utc::now(),
        end_time: Utc::now(),
        success: true,
        steps: vec!["step-1 Design [ok]".to_string()],
        decisions: Vec::new(),
        outcome: "done".to_string(),
        learnings: vec!["A 1-step plan succeeded for a api task".to_string()],
    }
}

#[tokio::test]
async fn test_task_memory_roundtrip_and_filters() {
    let (_dir, store) = open_store().await;

    store
        .insert_task_memory(&task_memory("t1", "director", "Build Login API", true))
        .await
        .unwrap();
    store
        .insert_task_memory(&task_memory("t2", "code", "Fix parser bug", false))
        .await
        .unwrap();
    store
        .insert_task_memory(&task_memory("t3", "code", "Add login rate limit", true))
        .await
        .unwrap();

    let fetched = store.get_task_memory("t1").await.unwrap().unwrap();
    assert_eq!(fetched.title, "Build Login API");
    assert_eq!(fetched.tokens_used, 42);
    assert!(store.get_task_memory("missing").await.unwrap().is_none());

    let by_agent = store
        .query_task_memories(&TaskMemoryFilter::default().agent("code"))
        .await
        .unwrap();
    assert_eq!(by_agent.len(), 2);
    // newest first
    assert_eq!(by_agent[0].task_id, "t3");

    let login = store
        .query_task_memories(&TaskMemoryFilter::default().title_contains("LOGIN"))
        .await
        .unwrap();
    assert_eq!(login.len(), 2);

    let failed = store
        .query_task_memories(&TaskMemoryFilter::default().success(false))
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].task_id, "t2");

    let now = Utc::now();
    let window = store
        .query_task_memories(
            &TaskMemoryFilter::default().between(now - Duration::hours(1), now + Duration::hours(1)),
        )
        .await
        .unwrap();
    assert_eq!(window.len(), 3);
    let past = store
        .query_task_memories(
            &TaskMemoryFilter::default().between(now - Duration::hours(2), now - Duration::hours(1)),
        )
        .await
        .unwrap();
    assert!(past.is_empty());

    let limited = store
        .query_task_memories(&TaskMemoryFilter::default().limit(1))
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_pattern_merge_and_usage() {
    let (_dir, store) = open_store().await;

    let first = store
        .merge_pattern(LearnedPattern::new("workflow", "build login api", "api plan", 1.0).with_example("t1"))
        .await
        .unwrap();
    let merged = store
        .merge_pattern(LearnedPattern::new("workflow", "build login api", "", 0.0).with_example("t2"))
        .await
        .unwrap();

    assert_eq!(merged.id, first.id);
    assert_eq!(merged.usage_count, 2);
    assert!((merged.success_rate - 0.5).abs() < 1e-9);
    assert_eq!(merged.examples, vec!["t1", "t2"]);
    assert_eq!(merged.description, "api plan");

    let updated = store
        .update_pattern_usage(&first.id, true)
        .await
        .unwrap()
        .unwrap();
    assert!((updated.success_rate - 0.55).abs() < 1e-9);
    assert!(store.update_pattern_usage("nope", true).await.unwrap().is_none());

    // same text, different type is a separate pattern
    store
        .merge_pattern(LearnedPattern::new("optimization", "build login api", "", 0.9))
        .await
        .unwrap();
    assert_eq!(store.list_patterns().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_concurrent_merges_are_not_lost() {
    let (_dir, store) = open_store().await;
    let store = Arc::new(store);

    store
        .merge_pattern(LearnedPattern::new("workflow", "shared", "", 1.0))
        .await
        .unwrap();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .merge_pattern(LearnedPattern::new("workflow", "shared", "", 1.0))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let patterns = store.list_patterns().await.unwrap();
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].usage_count, 11);
}

#[tokio::test]
async fn test_episodes_and_snippets() {
    let (_dir, store) = open_store().await;

    store.insert_episode(&episode("t1", "director")).await.unwrap();
    store.insert_episode(&episode("t2", "code")).await.unwrap();
    store.insert_episode(&episode("t3", "code")).await.unwrap();

    assert_eq!(store.list_episodes(None).await.unwrap().len(), 3);
    let code = store.list_episodes(Some("code")).await.unwrap();
    assert_eq!(
        code.iter().map(|e| e.task_id.as_str()).collect::<Vec<_>>(),
        vec!["t2", "t3"]
    );
    assert_eq!(
        store.get_episode("t1").await.unwrap().unwrap().task_type,
        TaskType::Api
    );

    let snippet = CodeSnippet {
        id: "s1".to_string(),
        task_id: Some("t2".to_string()),
        language: "rust".to_string(),
        description: "Token bucket limiter".to_string(),
        code: "struct Bucket;".to_string(),
        tags: vec!["implementation".to_string()],
        created_at: Utc::now(),
    };
    store.insert_code_snippet(&snippet).await.unwrap();
    assert_eq!(store.list_code_snippets().await.unwrap(), vec![snippet]);
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hive.db");

    let store = SqliteStore::open(&path).await.unwrap();
    store
        .insert_task_memory(&task_memory("t1", "code", "Persisted", true))
        .await
        .unwrap();
    store
        .merge_pattern(LearnedPattern::new("workflow", "persisted", "", 0.8))
        .await
        .unwrap();
    store.close().await.unwrap();

    let reopened = SqliteStore::open(&path).await.unwrap();
    assert!(reopened.get_task_memory("t1").await.unwrap().is_some());
    let patterns = reopened.list_patterns().await.unwrap();
    assert_eq!(patterns.len(), 1);
    assert!((patterns[0].success_rate - 0.8).abs() < 1e-9);
}

#[tokio::test]
async fn test_embeddings_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hive.db");

    let store = SqliteStore::open(&path).await.unwrap();
    let semantic = SemanticMemory::new(
        Arc::new(HashEmbedder::new(64)),
        Arc::new(store.vector_store()),
    );
    semantic
        .store(
            "write unit tests for the parser",
            EmbeddingMetadata::new(SemanticType::Task, "task").with_task("t0"),
        )
        .await
        .unwrap();
    let target = semantic
        .store(
            "build the login api endpoint",
            EmbeddingMetadata::new(SemanticType::Task, "task").with_task("t1"),
        )
        .await
        .unwrap();
    semantic
        .store("fn main() {}", EmbeddingMetadata::new(SemanticType::Code, "code"))
        .await
        .unwrap();
    store.close().await.unwrap();

    let reopened = SqliteStore::open(&path).await.unwrap();
    let vectors = reopened.vector_store();
    assert_eq!(vectors.len().await, 3);

    let semantic = SemanticMemory::new(Arc::new(HashEmbedder::new(64)), Arc::new(vectors.clone()));
    let hits = semantic
        .search_similar(
            "build the login api endpoint",
            5,
            &MetadataFilter::of_type(SemanticType::Task),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].record.id, target);
    assert_eq!(hits[0].record.metadata.task_id.as_deref(), Some("t1"));
    assert!((hits[0].similarity - 1.0).abs() < 1e-5);

    let retagged = EmbeddingMetadata::new(SemanticType::Solution, "task").with_tags(["login"]);
    assert!(vectors.update_metadata(&target, retagged).await.unwrap());
    assert!(!vectors.update_metadata("missing", EmbeddingMetadata::new(SemanticType::Task, "x")).await.unwrap());
    let solutions = vectors
        .filter(&MetadataFilter::of_type(SemanticType::Solution))
        .await
        .unwrap();
    assert_eq!(solutions.len(), 1);
    assert_eq!(solutions[0].metadata.tags, vec!["login".to_string()]);

    assert!(vectors.delete(&target).await.unwrap());
    assert!(!vectors.delete(&target).await.unwrap());
    assert_eq!(vectors.len().await, 2);
}
