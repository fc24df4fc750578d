//! Local approximate-nearest-neighbor backend.
//!
//! Keeps an HNSW index (`hora`) in memory with a sidecar map from numeric
//! id to chunk + vector. The backend has no native metadata filtering, so
//! listing and source lookups are full scans over the sidecar. Persistence
//! is an explicit JSON snapshot in the project's index directory; the HNSW
//! index itself is rebuilt from the snapshot vectors on attach, which also
//! keeps deletions simple (hora has no removal operation).
//!
//! Ids are monotonically increasing and never reused within one index
//! generation; `destroy` ends the generation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use hora::core::ann_index::ANNIndex;
use hora::core::metrics::Metric;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::cache::EmbedderHandle;
use crate::embedding::cosine_similarity;
use crate::models::{BackendKind, SourceFilter, SourceList, StoreInfo, StoredChunk};

use super::{partition_sources, strip_empty_metadata, Metadata, VectorStore};

const SNAPSHOT_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkRecord {
    content: String,
    metadata: Metadata,
    vector: Vec<f32>,
}

/// On-disk snapshot layout.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    dims: usize,
    next_id: usize,
    chunks: BTreeMap<usize, ChunkRecord>,
}

pub struct LocalIndexStore {
    dir: PathBuf,
    embedder: EmbedderHandle,
    dims: usize,
    index: HNSWIndex<f32, usize>,
    chunks: BTreeMap<usize, ChunkRecord>,
    next_id: usize,
}

impl LocalIndexStore {
    /// Load the snapshot if one exists, otherwise start empty. The HNSW
    /// index is rebuilt from the stored vectors either way.
    pub async fn attach(dir: PathBuf, embedder: EmbedderHandle) -> Result<Self> {
        let snapshot_path = dir.join(SNAPSHOT_FILE);

        let (dims, next_id, chunks) = if snapshot_path.exists() {
            let raw = std::fs::read_to_string(&snapshot_path)
                .with_context(|| format!("Failed to read {}", snapshot_path.display()))?;
            let snapshot: Snapshot = serde_json::from_str(&raw)
                .with_context(|| format!("Corrupt index snapshot {}", snapshot_path.display()))?;
            (snapshot.dims, snapshot.next_id, snapshot.chunks)
        } else {
            (embedder.dims(), 0, BTreeMap::new())
        };

        let index = build_index(dims, &chunks)?;

        Ok(Self {
            dir,
            embedder,
            dims,
            index,
            chunks,
            next_id,
        })
    }

    fn rebuild(&mut self) -> Result<()> {
        self.index = build_index(self.dims, &self.chunks)?;
        Ok(())
    }
}

fn build_index(dims: usize, chunks: &BTreeMap<usize, ChunkRecord>) -> Result<HNSWIndex<f32, usize>> {
    let mut index = HNSWIndex::new(dims, &HNSWParams::default());
    for (id, record) in chunks {
        index
            .add(&record.vector, *id)
            .map_err(|e| anyhow::anyhow!("index add failed: {}", e))?;
    }
    if !chunks.is_empty() {
        index
            .build(Metric::Euclidean)
            .map_err(|e| anyhow::anyhow!("index build failed: {}", e))?;
    }
    Ok(index)
}

fn to_stored(id: usize, record: &ChunkRecord) -> StoredChunk {
    StoredChunk {
        id: id.to_string(),
        content: record.content.clone(),
        metadata: record.metadata.clone(),
    }
}

#[async_trait]
impl VectorStore for LocalIndexStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Local
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

        for ((text, metadata), vector) in
            texts.into_iter().zip(metadatas.iter_mut()).zip(vectors.into_iter())
        {
            anyhow::ensure!(
                vector.len() == self.dims,
                "embedding dimension {} does not match index dimension {}",
                vector.len(),
                self.dims
            );
            strip_empty_metadata(metadata);

            let id = self.next_id;
            self.next_id += 1;
            self.chunks.insert(
                id,
                ChunkRecord {
                    content: text,
                    metadata: metadata.clone(),
                    vector,
                },
            );
            ids.push(id.to_string());
        }

        self.rebuild()?;
        Ok(ids)
    }

    async fn retrieve(
        &self,
        query: &str,
        score_threshold: f32,
        k: usize,
    ) -> Result<Vec<StoredChunk>> {
        if self.chunks.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed_query(query).await?;
        let neighbors = self.index.search(&query_vec, k);

        // The index orders by distance; re-score for the threshold cut.
        let mut scored: Vec<(f32, StoredChunk)> = neighbors
            .into_iter()
            .filter_map(|id| {
                let record = self.chunks.get(&id)?;
                let similarity = cosine_similarity(&query_vec, &record.vector);
                if similarity >= score_threshold {
                    Some((similarity, to_stored(id, record)))
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().map(|(_, chunk)| chunk).collect())
    }

    async fn list_sources(&self, filter: SourceFilter) -> Result<SourceList> {
        let sources = self
            .chunks
            .values()
            .filter_map(|r| r.metadata.get("source").and_then(|v| v.as_str()));
        Ok(partition_sources(sources, filter))
    }

    async fn info(&self) -> Result<StoreInfo> {
        Ok(StoreInfo {
            chunks: self.chunks.len(),
            metadatas: self.chunks.len(),
        })
    }

    async fn find_by_source(&self, source: &str) -> Result<Vec<StoredChunk>> {
        Ok(self
            .chunks
            .iter()
            .filter(|(_, r)| r.metadata.get("source").and_then(|v| v.as_str()) == Some(source))
            .map(|(id, r)| to_stored(*id, r))
            .collect())
    }

    async fn delete_by_source(&mut self, source: &str) -> Result<Vec<String>> {
        let matched: Vec<usize> = self
            .chunks
            .iter()
            .filter(|(_, r)| r.metadata.get("source").and_then(|v| v.as_str()) == Some(source))
            .map(|(id, _)| *id)
            .collect();

        if matched.is_empty() {
            return Ok(Vec::new());
        }

        for id in &matched {
            self.chunks.remove(id);
        }
        self.rebuild()?;

        Ok(matched.into_iter().map(|id| id.to_string()).collect())
    }

    async fn delete_by_id(&mut self, id: &str) -> Result<String> {
        if let Ok(numeric) = id.parse::<usize>() {
            if self.chunks.remove(&numeric).is_some() {
                self.rebuild()?;
            }
        }
        Ok(id.to_string())
    }

    async fn persist(&mut self) -> Result<()> {
        #[derive(Serialize)]
        struct SnapshotRef<'a> {
            dims: usize,
            next_id: usize,
            chunks: &'a BTreeMap<usize, ChunkRecord>,
        }

        std::fs::create_dir_all(&self.dir)?;
        let raw = serde_json::to_string(&SnapshotRef {
            dims: self.dims,
            next_id: self.next_id,
            chunks: &self.chunks,
        })?;
        let path = self.dir.join(SNAPSHOT_FILE);
        std::fs::write(&path, raw).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    async fn destroy(&mut self) -> Result<()> {
        self.chunks.clear();
        self.next_id = 0;
        self.index = build_index(self.dims, &self.chunks)?;
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.dir.display())),
        }
    }
}
