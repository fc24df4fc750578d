//! Shared test fixtures: deterministic model handles and a sandboxed
//! configuration rooted in a temp directory.
//!
//! Each integration test binary uses a subset of these helpers.
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use ragbrain::cache::{EmbedderCtor, EmbedderHandle, LanguageModelCtor, LanguageModelHandle, ModelRegistry};
use ragbrain::config::Config;
use ragbrain::embedding::Embedder;
use ragbrain::llm::{ChatMessage, LanguageModel};

pub const DIMS: usize = 16;

/// Deterministic embedder: hashes bytes into a signed bag-of-positions
/// vector, so identical texts embed identically and unrelated texts land
/// near-orthogonal. No network, no model files.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn vec_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let mut h: u64 = 0xcbf29ce484222325;
        for b in text.bytes() {
            h = h.wrapping_mul(0x100000001b3) ^ u64::from(b);
            let idx = (h % self.dims as u64) as usize;
            let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-test-embedder"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vec_for(t)).collect())
    }
}

/// Canned language model: returns a fixed answer and records how many
/// messages each completion request carried.
pub struct CannedLlm {
    pub answer: String,
    pub seen_message_counts: Arc<Mutex<Vec<usize>>>,
}

#[async_trait]
impl LanguageModel for CannedLlm {
    fn model_name(&self) -> &str {
        "canned-test-llm"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
        self.seen_message_counts
            .lock()
            .unwrap()
            .push(messages.len());
        Ok(self.answer.clone())
    }
}

/// Registry with a deterministic embedder (`e1`) and two canned language
/// models (`m1`, `m2`). Returns the shared message-count log of `m1` and
/// a counter of embedder constructions.
pub fn test_models() -> (ModelRegistry, Arc<Mutex<Vec<usize>>>, Arc<AtomicUsize>) {
    let mut registry = ModelRegistry::new();

    let constructions = Arc::new(AtomicUsize::new(0));
    let constructions_in_ctor = constructions.clone();
    let embed_ctor: EmbedderCtor = Arc::new(move |args| {
        constructions_in_ctor.fetch_add(1, Ordering::SeqCst);
        let dims = args.get("dims").and_then(|v| v.as_u64()).unwrap_or(DIMS as u64) as usize;
        Ok(Arc::new(HashEmbedder::new(dims)) as EmbedderHandle)
    });
    registry.register_embedding("e1", serde_json::json!({ "dims": DIMS }), embed_ctor);

    let seen = Arc::new(Mutex::new(Vec::new()));
    for (name, answer) in [("m1", "answer from m1"), ("m2", "answer from m2")] {
        let seen_in_ctor = seen.clone();
        let ctor: LanguageModelCtor = Arc::new(move |_args| {
            Ok(Arc::new(CannedLlm {
                answer: answer.to_string(),
                seen_message_counts: seen_in_ctor.clone(),
            }) as LanguageModelHandle)
        });
        registry.register_language(name, serde_json::json!({}), ctor);
    }

    (registry, seen, constructions)
}

/// Config sandboxed under `root`: embeddings, uploads, and the project
/// database all live in the temp directory.
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.db.path = root.join("data").join("projects.sqlite");
    config.storage.embeddings_path = root.join("embeddings");
    config.storage.uploads_path = root.join("uploads");
    std::fs::create_dir_all(&config.storage.embeddings_path).unwrap();
    config
}

/// Metadata map with a `source` field (plus optional keywords).
pub fn metadata(source: &str, keywords: Option<&str>) -> ragbrain::store::Metadata {
    let mut map = ragbrain::store::Metadata::new();
    map.insert("source".into(), serde_json::json!(source));
    if let Some(keywords) = keywords {
        map.insert("keywords".into(), serde_json::json!(keywords));
    }
    map
}
