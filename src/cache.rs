//! Model registry and handle cache.
//!
//! A [`ModelRegistry`] maps logical model names to constructors plus fixed
//! construction arguments, for both embedding and language models. The
//! [`HandleCache`] lazily invokes those constructors and memoizes the
//! resulting handles for the lifetime of the process — model handles are
//! the most expensive objects in the system (network clients, local ONNX
//! sessions) and must never be built twice for the same name.
//!
//! # Cache key semantics
//!
//! Handles are cached by logical name only. Extra arguments passed to
//! `resolve_*` are merged into the descriptor's fixed arguments (extra
//! wins on conflict) for the *first* construction and ignored afterwards:
//! two resolutions of the same name with different extra arguments return
//! the same handle, whichever caller got there first. Callers that need
//! genuinely different construction arguments must register them under
//! distinct logical names.
//!
//! # Concurrency
//!
//! Resolution of an uncached name is single-flight: concurrent callers
//! block on one in-flight construction (per-name `tokio::sync::OnceCell`)
//! and all observe the same handle. A failed construction leaves the cell
//! empty, so a later call can retry; the per-name slot is never left
//! locked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::config::{Config, ModelSettings};
use crate::embedding::{Embedder, OpenAIEmbedder};
use crate::error::{Error, Result};
use crate::llm::{LanguageModel, OpenAIChatModel};
use crate::models::ModelKind;

pub type EmbedderHandle = Arc<dyn Embedder>;
pub type LanguageModelHandle = Arc<dyn LanguageModel>;

/// Constructor for an embedding handle. Receives the merged argument
/// object and runs on the blocking pool (construction may download model
/// weights or do other slow I/O).
pub type EmbedderCtor =
    Arc<dyn Fn(&serde_json::Value) -> anyhow::Result<EmbedderHandle> + Send + Sync>;

/// Constructor for a language model handle.
pub type LanguageModelCtor =
    Arc<dyn Fn(&serde_json::Value) -> anyhow::Result<LanguageModelHandle> + Send + Sync>;

struct Descriptor<C> {
    fixed_args: serde_json::Value,
    ctor: C,
}

/// Static mapping from logical model name to constructor + fixed args.
///
/// Populated once at startup (from [`Config`] or by hand in tests) and
/// immutable afterwards.
#[derive(Default)]
pub struct ModelRegistry {
    embeddings: HashMap<String, Descriptor<EmbedderCtor>>,
    llms: HashMap<String, Descriptor<LanguageModelCtor>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the `[models]` configuration tables.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut registry = Self::new();

        for (name, settings) in &config.models.embeddings {
            let ctor = embedding_ctor(settings)?;
            registry.register_embedding(name, fixed_args_for(settings), ctor);
        }
        for (name, settings) in &config.models.llms {
            let ctor = language_ctor(settings)?;
            registry.register_language(name, fixed_args_for(settings), ctor);
        }

        Ok(registry)
    }

    pub fn register_embedding(
        &mut self,
        name: &str,
        fixed_args: serde_json::Value,
        ctor: EmbedderCtor,
    ) {
        self.embeddings
            .insert(name.to_string(), Descriptor { fixed_args, ctor });
    }

    pub fn register_language(
        &mut self,
        name: &str,
        fixed_args: serde_json::Value,
        ctor: LanguageModelCtor,
    ) {
        self.llms
            .insert(name.to_string(), Descriptor { fixed_args, ctor });
    }

    pub fn has_embedding(&self, name: &str) -> bool {
        self.embeddings.contains_key(name)
    }

    pub fn has_language(&self, name: &str) -> bool {
        self.llms.contains_key(name)
    }
}

fn fixed_args_for(settings: &ModelSettings) -> serde_json::Value {
    serde_json::json!({
        "model": settings.model,
        "dims": settings.dims,
        "api_base": settings.api_base,
        "max_retries": settings.max_retries,
        "timeout_secs": settings.timeout_secs
    })
}

fn embedding_ctor(settings: &ModelSettings) -> anyhow::Result<EmbedderCtor> {
    match settings.provider.as_str() {
        "openai" => Ok(Arc::new(|args: &serde_json::Value| {
            let model = str_arg(args, "model")?;
            let dims = args
                .get("dims")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| anyhow::anyhow!("embedding model requires 'dims'"))?
                as usize;
            let handle = OpenAIEmbedder::new(
                args.get("api_base").and_then(|v| v.as_str()),
                model,
                dims,
                u32_arg(args, "max_retries", 5),
                u64_arg(args, "timeout_secs", 30),
            )?;
            Ok(Arc::new(handle) as EmbedderHandle)
        })),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(|args: &serde_json::Value| {
            let model = str_arg(args, "model")?;
            let dims = args.get("dims").and_then(|v| v.as_u64()).map(|d| d as usize);
            let handle = crate::embedding::LocalEmbedder::new(model, dims)?;
            Ok(Arc::new(handle) as EmbedderHandle)
        })),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => anyhow::bail!(
            "Local embedding models require building with --features local-embeddings"
        ),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

fn language_ctor(settings: &ModelSettings) -> anyhow::Result<LanguageModelCtor> {
    match settings.provider.as_str() {
        "openai" => Ok(Arc::new(|args: &serde_json::Value| {
            let model = str_arg(args, "model")?;
            let handle = OpenAIChatModel::new(
                args.get("api_base").and_then(|v| v.as_str()),
                model,
                u32_arg(args, "max_retries", 5),
                u64_arg(args, "timeout_secs", 30),
            )?;
            Ok(Arc::new(handle) as LanguageModelHandle)
        })),
        other => anyhow::bail!("Unknown language model provider: {}", other),
    }
}

fn str_arg<'a>(args: &'a serde_json::Value, key: &str) -> anyhow::Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("model descriptor missing '{}'", key))
}

fn u32_arg(args: &serde_json::Value, key: &str, default: u32) -> u32 {
    args.get(key).and_then(|v| v.as_u64()).map(|v| v as u32).unwrap_or(default)
}

fn u64_arg(args: &serde_json::Value, key: &str, default: u64) -> u64 {
    args.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
}

/// Merge `extra` into `fixed` (shallow object merge, extra wins).
fn merge_args(fixed: &serde_json::Value, extra: Option<&serde_json::Value>) -> serde_json::Value {
    let mut merged = match fixed {
        serde_json::Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    if let Some(serde_json::Value::Object(extra)) = extra {
        for (k, v) in extra {
            merged.insert(k.clone(), v.clone());
        }
    }
    serde_json::Value::Object(merged)
}

/// Per-name single-flight memoization table.
struct KeyedOnce<T> {
    cells: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T: Clone> KeyedOnce<T> {
    fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    fn cell(&self, name: &str) -> Arc<OnceCell<T>> {
        let mut cells = self.cells.lock().expect("handle cache lock poisoned");
        cells
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }
}

/// Process-scoped cache of model handles.
///
/// Starts empty; there is no eviction and no teardown beyond process
/// exit. Shared by reference across every component that resolves models.
pub struct HandleCache {
    registry: ModelRegistry,
    embedders: KeyedOnce<EmbedderHandle>,
    llms: KeyedOnce<LanguageModelHandle>,
}

impl HandleCache {
    pub fn new(registry: ModelRegistry) -> Self {
        Self {
            registry,
            embedders: KeyedOnce::new(),
            llms: KeyedOnce::new(),
        }
    }

    /// Resolve an embedding handle by logical name, constructing it on
    /// first use.
    pub async fn resolve_embedder(
        &self,
        name: &str,
        extra: Option<&serde_json::Value>,
    ) -> Result<EmbedderHandle> {
        let descriptor = self.registry.embeddings.get(name).ok_or_else(|| {
            Error::UnknownModel {
                kind: ModelKind::Embedding,
                name: name.to_string(),
            }
        })?;

        let cell = self.embedders.cell(name);
        let handle = cell
            .get_or_try_init(|| construct(name, &descriptor.fixed_args, extra, &descriptor.ctor))
            .await?;
        Ok(handle.clone())
    }

    /// Resolve a language model handle by logical name, constructing it
    /// on first use.
    pub async fn resolve_llm(
        &self,
        name: &str,
        extra: Option<&serde_json::Value>,
    ) -> Result<LanguageModelHandle> {
        let descriptor = self.registry.llms.get(name).ok_or_else(|| {
            Error::UnknownModel {
                kind: ModelKind::Language,
                name: name.to_string(),
            }
        })?;

        let cell = self.llms.cell(name);
        let handle = cell
            .get_or_try_init(|| construct(name, &descriptor.fixed_args, extra, &descriptor.ctor))
            .await?;
        Ok(handle.clone())
    }
}

/// Run a handle constructor on the blocking pool with merged arguments.
async fn construct<T: Send + 'static>(
    name: &str,
    fixed_args: &serde_json::Value,
    extra: Option<&serde_json::Value>,
    ctor: &Arc<dyn Fn(&serde_json::Value) -> anyhow::Result<T> + Send + Sync>,
) -> Result<T> {
    tracing::debug!(model = name, "constructing model handle");
    let merged = merge_args(fixed_args, extra);
    let ctor = ctor.clone();
    let handle = tokio::task::spawn_blocking(move || ctor(&merged))
        .await
        .map_err(|e| Error::Other(e.into()))??;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticEmbedder {
        dims: usize,
    }

    #[async_trait]
    impl Embedder for StaticEmbedder {
        fn model_name(&self) -> &str {
            "static"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0; self.dims]).collect())
        }
    }

    fn counting_registry(constructions: Arc<AtomicUsize>) -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        let ctor: EmbedderCtor = Arc::new(move |args| {
            constructions.fetch_add(1, Ordering::SeqCst);
            // Simulate expensive construction.
            std::thread::sleep(std::time::Duration::from_millis(20));
            let dims = args.get("dims").and_then(|v| v.as_u64()).unwrap_or(4) as usize;
            Ok(Arc::new(StaticEmbedder { dims }) as EmbedderHandle)
        });
        registry.register_embedding("e1", serde_json::json!({ "dims": 4 }), ctor);
        registry
    }

    #[tokio::test]
    async fn resolve_is_memoized() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let cache = HandleCache::new(counting_registry(constructions.clone()));

        let a = cache.resolve_embedder("e1", None).await.unwrap();
        let b = cache.resolve_embedder("e1", None).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn differing_extra_args_return_first_handle() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let cache = HandleCache::new(counting_registry(constructions.clone()));

        let a = cache
            .resolve_embedder("e1", Some(&serde_json::json!({ "dims": 8 })))
            .await
            .unwrap();
        let b = cache
            .resolve_embedder("e1", Some(&serde_json::json!({ "dims": 16 })))
            .await
            .unwrap();
        // First writer wins: the second resolution sees the cached handle.
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.dims(), 8);
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resolution_constructs_once() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(HandleCache::new(counting_registry(constructions.clone())));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.resolve_embedder("e1", None).await.unwrap()
            }));
        }

        let mut resolved = Vec::new();
        for h in handles {
            resolved.push(h.await.unwrap());
        }
        for pair in resolved.windows(2) {
            assert!(Arc::ptr_eq(&pair[0], &pair[1]));
        }
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_name_is_typed_error() {
        let cache = HandleCache::new(ModelRegistry::new());
        let err = cache.resolve_embedder("nope", None).await.unwrap_err();
        assert!(matches!(err, Error::UnknownModel { .. }));
    }

    #[tokio::test]
    async fn failed_construction_can_be_retried() {
        let mut registry = ModelRegistry::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_in_ctor = attempts.clone();
        let ctor: EmbedderCtor = Arc::new(move |_args| {
            if attempts_in_ctor.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("transient failure");
            }
            Ok(Arc::new(StaticEmbedder { dims: 4 }) as EmbedderHandle)
        });
        registry.register_embedding("flaky", serde_json::json!({}), ctor);
        let cache = HandleCache::new(registry);

        assert!(cache.resolve_embedder("flaky", None).await.is_err());
        // The failed init released the slot; the retry succeeds.
        let handle = cache.resolve_embedder("flaky", None).await.unwrap();
        assert_eq!(handle.dims(), 4);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn merge_args_extra_wins() {
        let fixed = serde_json::json!({ "a": 1, "b": 2 });
        let extra = serde_json::json!({ "b": 3, "c": 4 });
        let merged = merge_args(&fixed, Some(&extra));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 3);
        assert_eq!(merged["c"], 4);
    }
}
