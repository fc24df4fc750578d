//! Remote key-value/search backend (Redis).
//!
//! Every chunk is a hash under a project-scoped key prefix, with the
//! embedding stored as a binary field. A named search index over the
//! prefix is created explicitly on attach and dropped (with its
//! documents) on destroy. Enumeration is prefix SCAN; similarity is
//! scored client-side over the stored embedding blobs so the backend
//! works with or without the search module loaded.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::path::PathBuf;

use crate::cache::EmbedderHandle;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{BackendKind, SourceFilter, SourceList, StoreInfo, StoredChunk};

use super::{partition_sources, strip_empty_metadata, Metadata, VectorStore};

const SCHEMA_FILE: &str = "schema.json";

pub struct RedisStore {
    conn: MultiplexedConnection,
    /// Named search index, one per project.
    index_name: String,
    /// All keys for this project live under this prefix.
    key_prefix: String,
    /// Local directory holding the schema artifact.
    dir: PathBuf,
    uploads_root: PathBuf,
    project: String,
    embedder: EmbedderHandle,
}

impl RedisStore {
    pub async fn attach(
        url: &str,
        project: &str,
        dir: PathBuf,
        uploads_root: PathBuf,
        embedder: EmbedderHandle,
    ) -> Result<Self> {
        let client = redis::Client::open(url)
            .with_context(|| format!("Invalid redis url {}", url))?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .with_context(|| format!("Failed to connect to redis at {}", url))?;

        let index_name = project.to_string();
        let key_prefix = format!("chunk:{}:", project);

        // Explicit named index over the project's key prefix. Tolerates a
        // pre-existing index and servers without the search module (the
        // store still functions through SCAN + client-side scoring).
        let created: redis::RedisResult<()> = redis::cmd("FT.CREATE")
            .arg(&index_name)
            .arg("ON")
            .arg("HASH")
            .arg("PREFIX")
            .arg(1)
            .arg(&key_prefix)
            .arg("SCHEMA")
            .arg("content")
            .arg("TEXT")
            .arg("source")
            .arg("TEXT")
            .arg("keywords")
            .arg("TEXT")
            .query_async(&mut conn)
            .await;
        tolerate(created, &["Index already exists", "unknown command"])?;

        Ok(Self {
            conn,
            index_name,
            key_prefix,
            dir,
            uploads_root,
            project: project.to_string(),
            embedder,
        })
    }

    async fn scan_keys(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut iter: redis::AsyncIter<String> =
            conn.scan_match(format!("{}*", self.key_prefix)).await?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn read_source(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let source: Option<String> = conn.hget(key, "source").await?;
        Ok(source)
    }

    async fn read_chunk(&self, key: &str) -> Result<Option<StoredChunk>> {
        let mut conn = self.conn.clone();
        let content: Option<String> = conn.hget(key, "content").await?;
        let Some(content) = content else {
            return Ok(None);
        };
        let metadata_json: Option<String> = conn.hget(key, "metadata").await?;
        let metadata: Metadata = metadata_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();

        Ok(Some(StoredChunk {
            id: key.to_string(),
            content,
            metadata,
        }))
    }
}

/// Treat listed server responses as success (idempotent schema ops).
fn tolerate(result: redis::RedisResult<()>, needles: &[&str]) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            let text = e.to_string();
            if needles.iter().any(|n| text.to_lowercase().contains(&n.to_lowercase())) {
                tracing::debug!(error = %text, "ignoring redis schema response");
                Ok(())
            } else {
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl VectorStore for RedisStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Redis
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
        let mut conn = self.conn.clone();
        let mut ids = Vec::with_capacity(texts.len());

        for ((text, metadata), vector) in texts.iter().zip(metadatas.iter_mut()).zip(vectors.iter())
        {
            strip_empty_metadata(metadata);
            let key = format!("{}{}", self.key_prefix, uuid::Uuid::new_v4());

            let mut cmd = redis::cmd("HSET");
            cmd.arg(&key).arg("content").arg(text);
            if let Some(source) = metadata.get("source").and_then(|v| v.as_str()) {
                cmd.arg("source").arg(source);
            }
            if let Some(keywords) = metadata.get("keywords").and_then(|v| v.as_str()) {
                cmd.arg("keywords").arg(keywords);
            }
            cmd.arg("metadata").arg(serde_json::to_string(metadata)?);
            cmd.arg("embedding").arg(vec_to_blob(vector));

            let _: () = cmd.query_async(&mut conn).await?;
            ids.push(key);
        }

        Ok(ids)
    }

    async fn retrieve(
        &self,
        query: &str,
        score_threshold: f32,
        k: usize,
    ) -> Result<Vec<StoredChunk>> {
        let query_vec = self.embedder.embed_query(query).await?;
        let mut conn = self.conn.clone();

        let mut scored: Vec<(f32, StoredChunk)> = Vec::new();
        for key in self.scan_keys().await? {
            let blob: Option<Vec<u8>> = conn.hget(&key, "embedding").await?;
            let Some(blob) = blob else { continue };
            let similarity = cosine_similarity(&query_vec, &blob_to_vec(&blob));
            if similarity < score_threshold {
                continue;
            }
            if let Some(chunk) = self.read_chunk(&key).await? {
                scored.push((similarity, chunk));
            }
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored.into_iter().map(|(_, chunk)| chunk).collect())
    }

    async fn list_sources(&self, filter: SourceFilter) -> Result<SourceList> {
        let mut sources = Vec::new();
        for key in self.scan_keys().await? {
            if let Some(source) = self.read_source(&key).await? {
                sources.push(source);
            }
        }
        Ok(partition_sources(sources.iter().map(|s| s.as_str()), filter))
    }

    async fn info(&self) -> Result<StoreInfo> {
        let count = self.scan_keys().await?.len();
        Ok(StoreInfo {
            chunks: count,
            metadatas: count,
        })
    }

    async fn find_by_source(&self, source: &str) -> Result<Vec<StoredChunk>> {
        let mut chunks = Vec::new();
        for key in self.scan_keys().await? {
            if self.read_source(&key).await?.as_deref() == Some(source) {
                if let Some(chunk) = self.read_chunk(&key).await? {
                    chunks.push(chunk);
                }
            }
        }
        Ok(chunks)
    }

    async fn delete_by_source(&mut self, source: &str) -> Result<Vec<String>> {
        // Sources ingested from the uploads area may have been recorded
        // with their full on-disk path; match that spelling too.
        let uploaded = self
            .uploads_root
            .join(&self.project)
            .join(source)
            .to_string_lossy()
            .into_owned();

        let mut conn = self.conn.clone();
        let mut deleted = Vec::new();
        for key in self.scan_keys().await? {
            let Some(stored) = self.read_source(&key).await? else {
                continue;
            };
            if stored == source || stored == uploaded {
                let _: () = conn.del(&key).await?;
                deleted.push(key);
            }
        }
        Ok(deleted)
    }

    async fn delete_by_id(&mut self, id: &str) -> Result<String> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(id).await?;
        Ok(id.to_string())
    }

    async fn persist(&mut self) -> Result<()> {
        // Writes are durable server-side; the schema artifact is the only
        // local state worth flushing.
        std::fs::create_dir_all(&self.dir)?;
        let schema = serde_json::json!({
            "index": self.index_name,
            "prefix": self.key_prefix,
            "fields": [
                { "name": "content", "type": "TEXT" },
                { "name": "source", "type": "TEXT" },
                { "name": "keywords", "type": "TEXT" }
            ]
        });
        let path = self.dir.join(SCHEMA_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(&schema)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    async fn destroy(&mut self) -> Result<()> {
        let mut conn = self.conn.clone();

        // Drop the named index together with its documents.
        let dropped: redis::RedisResult<()> = redis::cmd("FT.DROPINDEX")
            .arg(&self.index_name)
            .arg("DD")
            .query_async(&mut conn)
            .await;
        tolerate(dropped, &["Unknown Index name", "no such index", "unknown command"])?;

        // Sweep any keys the index drop did not cover.
        for key in self.scan_keys().await? {
            let _: () = conn.del(&key).await?;
        }

        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.dir.display())),
        }
    }
}
