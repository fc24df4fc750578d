//! Embedded document store backend.
//!
//! Each project owns one SQLite database file inside its versioned index
//! directory, holding a single fixed-name collection table. Metadata
//! filtering is plain SQL, and similarity search is a brute-force cosine
//! scan over the stored embedding blobs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::PathBuf;
use std::str::FromStr;

use crate::cache::EmbedderHandle;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{BackendKind, SourceFilter, SourceList, StoreInfo, StoredChunk};

use super::{partition_sources, strip_empty_metadata, Metadata, VectorStore};

/// Database file name inside the project's index directory. Fixed for
/// every project — the directory provides the scoping.
const COLLECTION_FILE: &str = "collection.sqlite";

pub struct DocStore {
    pool: SqlitePool,
    dir: PathBuf,
    embedder: EmbedderHandle,
}

impl DocStore {
    /// Open (or create) the project's collection database and run the
    /// idempotent schema setup.
    pub async fn attach(dir: PathBuf, embedder: EmbedderHandle) -> Result<Self> {
        let db_path = dir.join(COLLECTION_FILE);

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open collection at {}", db_path.display()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                source TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("Failed to create collection schema")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source)")
            .execute(&pool)
            .await?;

        Ok(Self { pool, dir, embedder })
    }
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> StoredChunk {
    let metadata_json: String = row.get("metadata_json");
    let metadata: Metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
    StoredChunk {
        id: row.get("id"),
        content: row.get("content"),
        metadata,
    }
}

#[async_trait]
impl VectorStore for DocStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Document
    }

    async fn add_texts(
        &mut self,
        texts: Vec<String>,
        mut metadatas: Vec<Metadata>,
    ) -> Result<Vec<String>> {
        anyhow::ensure!(
            texts.len() == metadatas.len(),
            "texts and metadatas must have the same length"
        );

        let vectors = self.embedder.embed(&texts).await?;
        let mut ids = Vec::with_capacity(texts.len());

        let mut tx = self.pool.begin().await?;
        for ((text, metadata), vector) in texts.iter().zip(metadatas.iter_mut()).zip(vectors.iter())
        {
            strip_empty_metadata(metadata);
            let source = metadata
                .get("source")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let id = uuid::Uuid::new_v4().to_string();

            sqlx::query(
                "INSERT INTO chunks (id, content, source, metadata_json, embedding) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(text)
            .bind(&source)
            .bind(serde_json::to_string(metadata)?)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;

            ids.push(id);
        }
        tx.commit().await?;

        Ok(ids)
    }

    async fn retrieve(
        &self,
        query: &str,
        score_threshold: f32,
        k: usize,
    ) -> Result<Vec<StoredChunk>> {
        let query_vec = self.embedder.embed_query(query).await?;

        let rows = sqlx::query("SELECT id, content, metadata_json, embedding FROM chunks")
            .fetch_all(&self.pool)
            .await?;

        let mut scored: Vec<(f32, StoredChunk)> = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(&query_vec, &blob_to_vec(&blob));
                if similarity >= score_threshold {
                    Some((similarity, row_to_chunk(row)))
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored.into_iter().map(|(_, chunk)| chunk).collect())
    }

    async fn list_sources(&self, filter: SourceFilter) -> Result<SourceList> {
        let rows = sqlx::query("SELECT DISTINCT source FROM chunks")
            .fetch_all(&self.pool)
            .await?;
        let sources: Vec<String> = rows.iter().map(|r| r.get("source")).collect();
        Ok(partition_sources(sources.iter().map(|s| s.as_str()), filter))
    }

    async fn info(&self) -> Result<StoreInfo> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(StoreInfo {
            chunks: count as usize,
            metadatas: count as usize,
        })
    }

    async fn find_by_source(&self, source: &str) -> Result<Vec<StoredChunk>> {
        let rows = sqlx::query("SELECT id, content, metadata_json FROM chunks WHERE source = ?")
            .bind(source)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn delete_by_source(&mut self, source: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM chunks WHERE source = ?")
            .bind(source)
            .fetch_all(&self.pool)
            .await?;
        let ids: Vec<String> = rows.iter().map(|r| r.get("id")).collect();

        if !ids.is_empty() {
            sqlx::query("DELETE FROM chunks WHERE source = ?")
                .bind(source)
                .execute(&self.pool)
                .await?;
        }
        Ok(ids)
    }

    async fn delete_by_id(&mut self, id: &str) -> Result<String> {
        sqlx::query("DELETE FROM chunks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(id.to_string())
    }

    async fn persist(&mut self) -> Result<()> {
        // SQLite is durable by write.
        Ok(())
    }

    async fn destroy(&mut self) -> Result<()> {
        self.pool.close().await;
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.dir.display())),
        }
    }
}
