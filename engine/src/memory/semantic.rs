//! Semantic memory
//!
//! Text is embedded into fixed-length vectors and ranked by cosine
//! similarity. Both halves are pluggable: [`Embedder`] turns text into a
//! vector, [`VectorStore`] holds and searches the records.
//!
//! The bundled [`HashEmbedder`] is a feature-hashing placeholder. It matches
//! shared words, not meaning, and should be replaced with a real embedding
//! model for production recall.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::tokenize;

/// What an embedded record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Task,
    Code,
    Pattern,
    Error,
    Solution,
    Episode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingMetadata {
    pub semantic_type: SemanticType,
    pub source: String,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl EmbeddingMetadata {
    pub fn new(semantic_type: SemanticType, source: impl Into<String>) -> Self {
        Self {
            semantic_type,
            source: source.into(),
            agent_id: None,
            task_id: None,
            tags: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub content: String,
    pub vector: Vec<f32>,
    pub metadata: EmbeddingMetadata,
}

#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: EmbeddingRecord,
    pub similarity: f32,
}

/// Metadata constraints for search and filtering. Unset fields match all.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub semantic_type: Option<SemanticType>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub tag: Option<String>,
}

impl MetadataFilter {
    pub fn of_type(semantic_type: SemanticType) -> Self {
        Self {
            semantic_type: Some(semantic_type),
            ..Self::default()
        }
    }

    pub fn matches(&self, metadata: &EmbeddingMetadata) -> bool {
        self.semantic_type.map_or(true, |t| metadata.semantic_type == t)
            && self
                .agent_id
                .as_ref()
                .map_or(true, |a| metadata.agent_id.as_ref() == Some(a))
            && self
                .task_id
                .as_ref()
                .map_or(true, |t| metadata.task_id.as_ref() == Some(t))
            && self.tag.as_ref().map_or(true, |t| metadata.tags.contains(t))
    }
}

/// Cosine similarity of two vectors.
///
/// Returns 0.0 when the dimensions differ or either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError>;
}

/// Deterministic feature-hashing embedder.
///
/// Each token is hashed with SHA-256 into a signed bucket and the result is
/// L2-normalized. Text without tokens embeds to the zero vector.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        Ok(self.embed_sync(text))
    }
}

/// Full-scan ranking shared by the vector store backends
pub(crate) fn rank<I>(records: I, vector: &[f32], limit: usize, filter: &MetadataFilter) -> Vec<ScoredRecord>
where
    I: IntoIterator<Item = EmbeddingRecord>,
{
    let mut scored: Vec<ScoredRecord> = records
        .into_iter()
        .filter(|r| filter.matches(&r.metadata))
        .map(|r| ScoredRecord {
            similarity: cosine_similarity(vector, &r.vector),
            record: r,
        })
        .collect();
    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    scored.truncate(limit);
    scored
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn insert(&self, record: EmbeddingRecord) -> Result<(), EngineError>;

    /// Top `limit` records by similarity to `vector`, best first
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredRecord>, EngineError>;

    /// Replace a record's metadata. Returns false for an unknown id.
    async fn update_metadata(
        &self,
        id: &str,
        metadata: EmbeddingMetadata,
    ) -> Result<bool, EngineError>;

    async fn delete(&self, id: &str) -> Result<bool, EngineError>;

    async fn filter(&self, filter: &MetadataFilter) -> Result<Vec<EmbeddingRecord>, EngineError>;

    async fn len(&self) -> usize;
}

/// Brute-force vector store. Search is linear in the number of records.
#[derive(Default)]
pub struct InMemoryVectorStore {
    records: RwLock<Vec<EmbeddingRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn insert(&self, record: EmbeddingRecord) -> Result<(), EngineError> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredRecord>, EngineError> {
        let records = self.records.read().await;
        Ok(rank(records.iter().cloned(), vector, limit, filter))
    }

    async fn update_metadata(
        &self,
        id: &str,
        metadata: EmbeddingMetadata,
    ) -> Result<bool, EngineError> {
        let mut records = self.records.write().await;
        Ok(match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.metadata = metadata;
                true
            }
            None => false,
        })
    }

    async fn delete(&self, id: &str) -> Result<bool, EngineError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() != before)
    }

    async fn filter(&self, filter: &MetadataFilter) -> Result<Vec<EmbeddingRecord>, EngineError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| filter.matches(&r.metadata))
            .cloned()
            .collect())
    }

    async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

/// Embedding-backed memory tier
#[derive(Clone)]
pub struct SemanticMemory {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl SemanticMemory {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Hash embedder over an in-memory store
    pub fn in_memory(dimensions: usize) -> Self {
        Self::new(
            Arc::new(HashEmbedder::new(dimensions)),
            Arc::new(InMemoryVectorStore::new()),
        )
    }

    /// Embed and store `content`. Returns the new record id.
    pub async fn store(
        &self,
        content: &str,
        metadata: EmbeddingMetadata,
    ) -> Result<String, EngineError> {
        let vector = self.embedder.embed(content).await?;
        let id = uuid::Uuid::new_v4().to_string();
        self.store
            .insert(EmbeddingRecord {
                id: id.clone(),
                content: content.to_string(),
                vector,
                metadata,
            })
            .await?;
        Ok(id)
    }

    pub async fn search_similar(
        &self,
        query: &str,
        limit: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredRecord>, EngineError> {
        let vector = self.embedder.embed(query).await?;
        self.store.search(&vector, limit, filter).await
    }

    pub async fn update_metadata(
        &self,
        id: &str,
        metadata: EmbeddingMetadata,
    ) -> Result<bool, EngineError> {
        self.store.update_metadata(id, metadata).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, EngineError> {
        self.store.delete(id).await
    }

    pub async fn filter(&self, filter: &MetadataFilter) -> Result<Vec<EmbeddingRecord>, EngineError> {
        self.store.filter(filter).await
    }

    pub async fn len(&self) -> usize {
        self.store.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_edges() {
        let v = [0.3, -0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&v, &[0.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&v, &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[tokio::test]
    async fn test_hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("Build login API").await.unwrap();
        let b = embedder.embed("build LOGIN api").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        let empty = embedder.embed("").await.unwrap();
        assert!(empty.iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn test_identical_content_ranks_first() {
        let memory = SemanticMemory::in_memory(128);
        memory
            .store(
                "write unit tests for the parser",
                EmbeddingMetadata::new(SemanticType::Task, "test"),
            )
            .await
            .unwrap();
        let target = memory
            .store(
                "build the login api endpoint",
                EmbeddingMetadata::new(SemanticType::Task, "test"),
            )
            .await
            .unwrap();

        let hits = memory
            .search_similar("build the login api endpoint", 2, &MetadataFilter::default())
            .await
            .unwrap();
        assert_eq!(hits[0].record.id, target);
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_metadata_filter_update_and_delete() {
        let memory = SemanticMemory::in_memory(32);
        let id = memory
            .store("fn main() {}", EmbeddingMetadata::new(SemanticType::Code, "code"))
            .await
            .unwrap();
        memory
            .store("a task", EmbeddingMetadata::new(SemanticType::Task, "task"))
            .await
            .unwrap();

        let code = memory
            .filter(&MetadataFilter::of_type(SemanticType::Code))
            .await
            .unwrap();
        assert_eq!(code.len(), 1);

        let updated = EmbeddingMetadata::new(SemanticType::Solution, "code").with_tags(["rust"]);
        assert!(memory.update_metadata(&id, updated).await.unwrap());
        let tagged = MetadataFilter {
            tag: Some("rust".to_string()),
            ..MetadataFilter::default()
        };
        assert_eq!(memory.filter(&tagged).await.unwrap().len(), 1);

        assert!(memory.delete(&id).await.unwrap());
        assert!(!memory.delete(&id).await.unwrap());
        assert_eq!(memory.len().await, 1);
    }
}
