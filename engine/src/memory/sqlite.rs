//! SQLite memory store
//!
//! Durable [`MemoryStore`] using sqlx with WAL mode. Records are serialized
//! to JSON; a handful of columns are broken out for filtering.
//!
//! [`SqliteVectorStore`] shares the pool and keeps embeddings in the same
//! file, so semantic recall survives a restart.
//!
//! Pattern merges and usage updates read and write inside one transaction,
//! and are additionally serialized through a process-local write lock so two
//! writers in the same engine never race for the SQLite write upgrade.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sdk::errors::EngineError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{ConnectOptions, QueryBuilder, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::semantic::{rank, EmbeddingMetadata, EmbeddingRecord, MetadataFilter, ScoredRecord, VectorStore};
use super::{CodeSnippet, Episode, LearnedPattern, MemoryStore, TaskMemory, TaskMemoryFilter};

pub struct SqliteStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema
    pub async fn open(db_path: &Path) -> Result<Self> {
        info!("Opening memory database at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to memory database")?;

        debug!("Memory database connection established");

        let store = Self {
            pool,
            write_lock: Mutex::new(()),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../../migrations/001_memory.sql"))
            .execute(&self.pool)
            .await
            .context("Failed to execute migration 001_memory.sql")?;
        Ok(())
    }

    /// Vector store over the same database
    pub fn vector_store(&self) -> SqliteVectorStore {
        SqliteVectorStore {
            pool: self.pool.clone(),
        }
    }

    /// Checkpoint the WAL and close every connection
    pub async fn close(self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to flush WAL")?;
        self.pool.close().await;
        Ok(())
    }
}

fn storage_err(e: sqlx::Error) -> EngineError {
    EngineError::Storage(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<String, EngineError> {
    serde_json::to_string(value).map_err(|e| EngineError::Storage(e.to_string()))
}

fn decode<T: DeserializeOwned>(data: &str) -> Result<T, EngineError> {
    serde_json::from_str(data)
        .map_err(|e| EngineError::Storage(format!("Corrupt memory record: {}", e)))
}

fn decode_rows<T: DeserializeOwned>(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<T>, EngineError> {
    rows.iter()
        .map(|row| {
            let data: String = row.try_get("data").map_err(storage_err)?;
            decode(&data)
        })
        .collect()
}

#[async_trait]
impl MemoryStore for SqliteStore {
    async fn insert_task_memory(&self, memory: &TaskMemory) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO task_memories (id, task_id, agent_id, title, success, created_at, data)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&memory.id)
        .bind(&memory.task_id)
        .bind(&memory.agent_id)
        .bind(&memory.title)
        .bind(memory.success)
        .bind(memory.created_at.timestamp_millis())
        .bind(encode(memory)?)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_task_memory(&self, task_id: &str) -> Result<Option<TaskMemory>, EngineError> {
        let row = sqlx::query(
            "SELECT data FROM task_memories WHERE task_id = ?
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        match row {
            Some(row) => {
                let data: String = row.try_get("data").map_err(storage_err)?;
                Ok(Some(decode(&data)?))
            }
            None => Ok(None),
        }
    }

    async fn query_task_memories(
        &self,
        filter: &TaskMemoryFilter,
    ) -> Result<Vec<TaskMemory>, EngineError> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT data FROM task_memories WHERE 1 = 1");

        if let Some(agent_id) = &filter.agent_id {
            query.push(" AND agent_id = ").push_bind(agent_id.clone());
        }
        if let Some(success) = filter.success {
            query.push(" AND success = ").push_bind(success);
        }
        if let Some(since) = filter.since {
            query
                .push(" AND created_at >= ")
                .push_bind(since.timestamp_millis());
        }
        if let Some(until) = filter.until {
            query
                .push(" AND created_at <= ")
                .push_bind(until.timestamp_millis());
        }
        if let Some(needle) = &filter.title_contains {
            query
                .push(" AND instr(lower(title), lower(")
                .push_bind(needle.clone())
                .push(")) > 0");
        }
        query.push(" ORDER BY created_at DESC, rowid DESC");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        decode_rows(&rows)
    }

    async fn merge_pattern(&self, pattern: LearnedPattern) -> Result<LearnedPattern, EngineError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let existing = sqlx::query(
            "SELECT data FROM learned_patterns WHERE pattern_type = ? AND pattern = ?",
        )
        .bind(&pattern.pattern_type)
        .bind(&pattern.pattern)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_err)?;

        let stored = match existing {
            Some(row) => {
                let data: String = row.try_get("data").map_err(storage_err)?;
                let mut stored: LearnedPattern = decode(&data)?;
                stored.merge_from(&pattern);
                sqlx::query("UPDATE learned_patterns SET data = ? WHERE id = ?")
                    .bind(encode(&stored)?)
                    .bind(&stored.id)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_err)?;
                stored
            }
            None => {
                sqlx::query(
                    "INSERT INTO learned_patterns (id, pattern_type, pattern, data)
                     VALUES (?, ?, ?, ?)",
                )
                .bind(&pattern.id)
                .bind(&pattern.pattern_type)
                .bind(&pattern.pattern)
                .bind(encode(&pattern)?)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
                pattern
            }
        };

        tx.commit().await.map_err(storage_err)?;
        Ok(stored)
    }

    async fn update_pattern_usage(
        &self,
        pattern_id: &str,
        success: bool,
    ) -> Result<Option<LearnedPattern>, EngineError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let row = sqlx::query("SELECT data FROM learned_patterns WHERE id = ?")
            .bind(pattern_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let data: String = row.try_get("data").map_err(storage_err)?;
        let mut pattern: LearnedPattern = decode(&data)?;
        pattern.record_usage(success);

        sqlx::query("UPDATE learned_patterns SET data = ? WHERE id = ?")
            .bind(encode(&pattern)?)
            .bind(pattern_id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(Some(pattern))
    }

    async fn list_patterns(&self) -> Result<Vec<LearnedPattern>, EngineError> {
        let rows = sqlx::query("SELECT data FROM learned_patterns ORDER BY rowid")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        decode_rows(&rows)
    }

    async fn insert_episode(&self, episode: &Episode) -> Result<(), EngineError> {
        sqlx::query("INSERT INTO episodes (id, task_id, agent_id, data) VALUES (?, ?, ?, ?)")
            .bind(&episode.id)
            .bind(&episode.task_id)
            .bind(&episode.agent_id)
            .bind(encode(episode)?)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn get_episode(&self, task_id: &str) -> Result<Option<Episode>, EngineError> {
        let row = sqlx::query("SELECT data FROM episodes WHERE task_id = ? ORDER BY seq DESC LIMIT 1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        match row {
            Some(row) => {
                let data: String = row.try_get("data").map_err(storage_err)?;
                Ok(Some(decode(&data)?))
            }
            None => Ok(None),
        }
    }

    async fn list_episodes(&self, agent_id: Option<&str>) -> Result<Vec<Episode>, EngineError> {
        let rows = match agent_id {
            Some(agent_id) => {
                sqlx::query("SELECT data FROM episodes WHERE agent_id = ? ORDER BY seq")
                    .bind(agent_id)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT data FROM episodes ORDER BY seq")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(storage_err)?;
        decode_rows(&rows)
    }

    async fn insert_code_snippet(&self, snippet: &CodeSnippet) -> Result<(), EngineError> {
        sqlx::query("INSERT INTO code_snippets (id, data) VALUES (?, ?)")
            .bind(&snippet.id)
            .bind(encode(snippet)?)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn list_code_snippets(&self) -> Result<Vec<CodeSnippet>, EngineError> {
        let rows = sqlx::query("SELECT data FROM code_snippets ORDER BY seq")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        decode_rows(&rows)
    }
}

/// Embedding records persisted next to the other memory tiers.
///
/// Search loads the candidate rows and ranks them in process, like the
/// in-memory store. The semantic type is a column so typed searches skip
/// unrelated rows.
#[derive(Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    async fn load(&self, filter: &MetadataFilter) -> Result<Vec<EmbeddingRecord>, EngineError> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT data FROM embeddings WHERE 1 = 1");
        if let Some(semantic_type) = filter.semantic_type {
            query
                .push(" AND semantic_type = ")
                .push_bind(encode(&semantic_type)?);
        }
        if let Some(task_id) = &filter.task_id {
            query.push(" AND task_id = ").push_bind(task_id.clone());
        }
        query.push(" ORDER BY seq");

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        let records: Vec<EmbeddingRecord> = decode_rows(&rows)?;
        Ok(records
            .into_iter()
            .filter(|r| filter.matches(&r.metadata))
            .collect())
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn insert(&self, record: EmbeddingRecord) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO embeddings (id, semantic_type, task_id, data) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                semantic_type = excluded.semantic_type,
                task_id = excluded.task_id,
                data = excluded.data",
        )
        .bind(&record.id)
        .bind(encode(&record.metadata.semantic_type)?)
        .bind(&record.metadata.task_id)
        .bind(encode(&record)?)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredRecord>, EngineError> {
        Ok(rank(self.load(filter).await?, vector, limit, filter))
    }

    async fn update_metadata(
        &self,
        id: &str,
        metadata: EmbeddingMetadata,
    ) -> Result<bool, EngineError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let row = sqlx::query("SELECT data FROM embeddings WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?;
        let Some(row) = row else {
            return Ok(false);
        };

        let data: String = row.try_get("data").map_err(storage_err)?;
        let mut record: EmbeddingRecord = decode(&data)?;
        record.metadata = metadata;
        sqlx::query("UPDATE embeddings SET semantic_type = ?, task_id = ?, data = ? WHERE id = ?")
            .bind(encode(&record.metadata.semantic_type)?)
            .bind(&record.metadata.task_id)
            .bind(encode(&record)?)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        tx.commit().await.map_err(storage_err)?;
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool, EngineError> {
        let result = sqlx::query("DELETE FROM embeddings WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn filter(&self, filter: &MetadataFilter) -> Result<Vec<EmbeddingRecord>, EngineError> {
        self.load(filter).await
    }

    async fn len(&self) -> usize {
        match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&self.pool)
            .await
        {
            Ok(count) => count as usize,
            Err(e) => {
                warn!("Failed to count embeddings: {}", e);
                0
            }
        }
    }
}
