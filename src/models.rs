//! Core data types shared across the cache, store, and orchestration layers.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which family of model a logical name resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Embedding,
    Language,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Embedding => f.write_str("embedding"),
            ModelKind::Language => f.write_str("language"),
        }
    }
}

/// Storage technology backing a project's vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Embedded document store (per-project SQLite file).
    Document,
    /// Local approximate-nearest-neighbor index with file persistence.
    Local,
    /// Remote key-value/search engine (Redis).
    Redis,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Document => "document",
            BackendKind::Local => "local",
            BackendKind::Redis => "redis",
        }
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document" => Ok(BackendKind::Document),
            "local" => Ok(BackendKind::Local),
            "redis" => Ok(BackendKind::Redis),
            other => anyhow::bail!("unknown vector store backend: {}", other),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted project configuration row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    /// Logical embedding model name.
    pub embeddings: String,
    /// Logical language model name.
    pub llm: String,
    /// Optional system prompt override for generation.
    pub system: Option<String>,
    pub vectorstore: BackendKind,
}

/// Partial update for a project. Only `llm` and `system` may change
/// post-creation; `embeddings` and `vectorstore` are fixed because the
/// persisted index depends on them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectUpdate {
    pub llm: Option<String>,
    pub system: Option<String>,
}

/// One unit of indexed content as stored in (and returned from) a
/// project's vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    /// Backend-assigned opaque id, unique within the project's store.
    pub id: String,
    pub content: String,
    /// At least a `source` field; `keywords` optional.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl StoredChunk {
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(|v| v.as_str())
    }
}

/// Which partition of sources a listing should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFilter {
    All,
    Urls,
    Other,
}

/// Distinct `source` metadata values, partitioned by the network-locator
/// prefix heuristic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceList {
    pub urls: BTreeSet<String>,
    pub other: BTreeSet<String>,
}

/// Chunk/metadata counts for a project's store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreInfo {
    pub chunks: usize,
    pub metadatas: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_roundtrip() {
        for kind in [BackendKind::Document, BackendKind::Local, BackendKind::Redis] {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), kind);
        }
        assert!("elastic".parse::<BackendKind>().is_err());
    }

    #[test]
    fn stored_chunk_source_accessor() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("source".into(), serde_json::json!("/tmp/a.txt"));
        let chunk = StoredChunk {
            id: "1".into(),
            content: "hello".into(),
            metadata,
        };
        assert_eq!(chunk.source(), Some("/tmp/a.txt"));
    }
}
