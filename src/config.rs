//! TOML configuration with environment overrides.
//!
//! Every field has a serde default so a missing or partial file still
//! yields a usable `Config`. A handful of settings can be overridden by
//! environment variables (`EMBEDDINGS_PATH`, `UPLOADS_PATH`, `REDIS_HOST`,
//! `REDIS_PORT`, `ANONYMIZED_TELEMETRY`, `LOG_LEVEL`) so a container
//! deployment never needs to template the file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Opt out of backend-library telemetry. Off by default.
    #[serde(default)]
    pub anonymized_telemetry: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub models: ModelsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            storage: StorageConfig::default(),
            redis: RedisConfig::default(),
            retrieval: RetrievalConfig::default(),
            anonymized_telemetry: false,
            log_level: default_log_level(),
            models: ModelsConfig::default(),
        }
    }
}

/// Location of the relational project database.
#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory for persisted per-project indices.
    #[serde(default = "default_embeddings_path")]
    pub embeddings_path: PathBuf,
    /// Root directory for uploaded documents.
    #[serde(default = "default_uploads_path")]
    pub uploads_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            embeddings_path: default_embeddings_path(),
            uploads_path: default_uploads_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
}

impl RedisConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
        }
    }
}

/// Retrieval defaults applied when a request does not specify them.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    #[serde(default = "default_k")]
    pub k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            score_threshold: default_score_threshold(),
            k: default_k(),
        }
    }
}

/// Logical model name → provider settings, for both model families.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModelsConfig {
    #[serde(default)]
    pub embeddings: BTreeMap<String, ModelSettings>,
    #[serde(default)]
    pub llms: BTreeMap<String, ModelSettings>,
}

/// Provider settings for one logical model name.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelSettings {
    /// `"openai"` (OpenAI-compatible HTTP API) or `"local"` (fastembed,
    /// embeddings only, behind the `local-embeddings` feature).
    pub provider: String,
    /// Provider-side model identifier.
    #[serde(default)]
    pub model: Option<String>,
    /// Embedding dimensionality; required for embedding models.
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for OpenAI-compatible APIs. Defaults to api.openai.com.
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/ragbrain.sqlite")
}
fn default_embeddings_path() -> PathBuf {
    PathBuf::from("./embeddings/")
}
fn default_uploads_path() -> PathBuf {
    PathBuf::from("./uploads/")
}
fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}
fn default_redis_port() -> u16 {
    6379
}
fn default_score_threshold() -> f32 {
    0.6
}
fn default_k() -> usize {
    4
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Load configuration from `path` (missing file → defaults), then apply
/// environment overrides and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);

    // Validate retrieval defaults
    if !(0.0..=1.0).contains(&config.retrieval.score_threshold) {
        anyhow::bail!("retrieval.score_threshold must be in [0.0, 1.0]");
    }
    if config.retrieval.k == 0 {
        anyhow::bail!("retrieval.k must be >= 1");
    }

    // Validate model providers
    for (name, settings) in config
        .models
        .embeddings
        .iter()
        .chain(config.models.llms.iter())
    {
        match settings.provider.as_str() {
            "openai" | "local" => {}
            other => anyhow::bail!("model '{}': unknown provider '{}'", name, other),
        }
    }

    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var("EMBEDDINGS_PATH") {
        config.storage.embeddings_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("UPLOADS_PATH") {
        config.storage.uploads_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("REDIS_HOST") {
        config.redis.host = v;
    }
    if let Ok(v) = std::env::var("REDIS_PORT") {
        if let Ok(port) = v.parse() {
            config.redis.port = port;
        }
    }
    if let Ok(v) = std::env::var("ANONYMIZED_TELEMETRY") {
        config.anonymized_telemetry = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
    }
    if let Ok(v) = std::env::var("LOG_LEVEL") {
        config.log_level = v;
    }
}
