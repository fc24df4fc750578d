//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the single lifecycle contract every
//! storage backend implements: attach, add, retrieve, list, info, find,
//! delete, persist, reset, destroy. Backends differ wildly in how they
//! identify and persist content — a fixed-name SQLite collection per
//! project, a rebuilt-in-memory ANN index with a file snapshot, a Redis
//! key prefix plus a named search index — and none of those identifiers
//! may leak above this module.
//!
//! Implementations must be `Send + Sync`; per-project write serialization
//! is enforced by the owning [`Project`](crate::project::Project), which
//! wraps the store in a `tokio::sync::RwLock`.

pub mod doc;
pub mod local;
pub mod remote;

use anyhow::Result;
use async_trait::async_trait;

use crate::cache::HandleCache;
use crate::config::Config;
use crate::error::Error;
use crate::models::{BackendKind, ProjectConfig, SourceFilter, SourceList, StoreInfo, StoredChunk};
use crate::paths;

pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Uniform contract over one project's vector store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Insert texts with parallel metadata; returns backend-assigned ids
    /// in input order. Metadata keys with null or empty values are
    /// stripped before insertion.
    async fn add_texts(
        &mut self,
        texts: Vec<String>,
        metadatas: Vec<Metadata>,
    ) -> Result<Vec<String>>;

    /// Similarity search: at most `k` chunks whose score meets
    /// `score_threshold`, best first. An empty result is not an error.
    async fn retrieve(
        &self,
        query: &str,
        score_threshold: f32,
        k: usize,
    ) -> Result<Vec<StoredChunk>>;

    /// Deduplicated partition of every distinct `source` value. Backends
    /// must enumerate fully — no reliance on backend result caps.
    async fn list_sources(&self, filter: SourceFilter) -> Result<SourceList>;

    async fn info(&self) -> Result<StoreInfo>;

    /// Chunks whose `source` metadata matches exactly.
    async fn find_by_source(&self, source: &str) -> Result<Vec<StoredChunk>>;

    /// Delete all chunks for a source; zero matches is a no-op.
    async fn delete_by_source(&mut self, source: &str) -> Result<Vec<String>>;

    /// Delete one chunk by id; a missing id is a no-op.
    async fn delete_by_id(&mut self, id: &str) -> Result<String>;

    /// Flush in-memory state to durable storage. No-op for backends that
    /// are durable by write.
    async fn persist(&mut self) -> Result<()>;

    /// Irreversibly delete all persisted state for this project.
    /// Idempotent: destroying an absent store is not an error.
    async fn destroy(&mut self) -> Result<()>;
}

impl std::fmt::Debug for dyn VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("backend", &self.backend())
            .finish()
    }
}

/// Open or create the store for `project`, dispatched on its configured
/// backend kind. Existing persisted state is opened; otherwise an empty
/// store is created. Corrupt or unreadable state surfaces as
/// [`Error::StoreInit`].
pub async fn attach(
    config: &Config,
    project: &ProjectConfig,
    cache: &HandleCache,
) -> crate::error::Result<Box<dyn VectorStore>> {
    let embedder = cache.resolve_embedder(&project.embeddings, None).await?;
    let dir = paths::ensure_index_dir(&config.storage.embeddings_path, &project.name)
        .map_err(|e| Error::StoreInit {
            project: project.name.clone(),
            source: e,
        })?;

    let store: Result<Box<dyn VectorStore>> = match project.vectorstore {
        BackendKind::Document => doc::DocStore::attach(dir, embedder)
            .await
            .map(|s| Box::new(s) as Box<dyn VectorStore>),
        BackendKind::Local => local::LocalIndexStore::attach(dir, embedder)
            .await
            .map(|s| Box::new(s) as Box<dyn VectorStore>),
        BackendKind::Redis => remote::RedisStore::attach(
            &config.redis.url(),
            &project.name,
            dir,
            config.storage.uploads_path.clone(),
            embedder,
        )
        .await
        .map(|s| Box::new(s) as Box<dyn VectorStore>),
    };

    store.map_err(|e| Error::StoreInit {
        project: project.name.clone(),
        source: e,
    })
}

/// Destroy all indexed content and re-attach a fresh empty store,
/// re-resolving the embedding handle from `cache`.
pub async fn reset(
    store: &mut Box<dyn VectorStore>,
    config: &Config,
    project: &ProjectConfig,
    cache: &HandleCache,
) -> crate::error::Result<()> {
    store.destroy().await.map_err(|e| Error::StoreInit {
        project: project.name.clone(),
        source: e,
    })?;
    *store = attach(config, project, cache).await?;
    Ok(())
}

/// Drop metadata keys whose value is null or an empty string — backends
/// reject null-valued fields.
pub fn strip_empty_metadata(metadata: &mut Metadata) {
    metadata.retain(|_, v| match v {
        serde_json::Value::Null => false,
        serde_json::Value::String(s) => !s.is_empty(),
        _ => true,
    });
}

/// Network-locator heuristic used by source listings. A literal prefix
/// check, not a URL parser; case and other schemes do not match.
pub fn is_network_source(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Partition distinct sources into urls/other per `filter`.
pub fn partition_sources<'a, I>(sources: I, filter: SourceFilter) -> SourceList
where
    I: IntoIterator<Item = &'a str>,
{
    let mut list = SourceList::default();
    for source in sources {
        let is_url = is_network_source(source);
        match filter {
            SourceFilter::Urls if !is_url => continue,
            SourceFilter::Other if is_url => continue,
            _ => {}
        }
        if is_url {
            list.urls.insert(source.to_string());
        } else {
            list.other.insert(source.to_string());
        }
    }
    list
}
