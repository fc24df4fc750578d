//! Question/chat orchestration.
//!
//! The [`Brain`] composes the process-wide [`HandleCache`] with the
//! [`ProjectRegistry`] and runs the retrieval-then-generation flow. It
//! also fronts the store lifecycle operations (ingest, list, info, find,
//! delete, reset) so callers never touch project locks directly.
//!
//! Retrieval failures during a question or chat turn are deliberately
//! downgraded to "no relevant context": generation always proceeds, with
//! an empty context block if need be, and typically produces an
//! "I don't know"-style answer.

use std::sync::Arc;

use crate::cache::{HandleCache, ModelRegistry};
use crate::config::Config;
use crate::db::ProjectRepository;
use crate::error::{Error, Result};
use crate::llm::ChatMessage;
use crate::models::{
    ProjectConfig, ProjectUpdate, SourceFilter, SourceList, StoreInfo, StoredChunk,
};
use crate::project::Project;
use crate::registry::ProjectRegistry;
use crate::store::{Metadata, VectorStore as _};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a digital assistant. Answer the question using only \
    the given context. Never invent an answer: if you don't know the answer, say you don't know. \
    If you don't understand the question, say you don't understand.";

/// Per-request overrides for [`Brain::question`].
#[derive(Debug, Clone, Default)]
pub struct QuestionOptions {
    /// Language model override (falls back to the project default).
    pub llm: Option<String>,
    /// System prompt override (falls back to the project's, then the
    /// built-in default).
    pub system: Option<String>,
    pub score_threshold: Option<f32>,
    pub k: Option<usize>,
}

/// Per-request overrides for [`Brain::chat`].
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub score_threshold: Option<f32>,
    pub k: Option<usize>,
}

pub struct Brain {
    config: Config,
    cache: Arc<HandleCache>,
    registry: ProjectRegistry,
}

impl Brain {
    pub fn new(
        config: Config,
        models: ModelRegistry,
        repo: Arc<dyn ProjectRepository>,
    ) -> Self {
        let cache = Arc::new(HandleCache::new(models));
        let registry = ProjectRegistry::new(config.clone(), repo);
        Self {
            config,
            cache,
            registry,
        }
    }

    pub fn cache(&self) -> &Arc<HandleCache> {
        &self.cache
    }

    // ── Project lifecycle ─────────────────────────────────────────────

    pub async fn create_project(&self, config: ProjectConfig) -> Result<ProjectConfig> {
        let project = self.registry.create(config, &self.cache).await?;
        Ok(project.config().await)
    }

    pub async fn edit_project(
        &self,
        name: &str,
        update: ProjectUpdate,
    ) -> Result<Option<ProjectConfig>> {
        match self.registry.edit(name, update, &self.cache).await? {
            Some(project) => Ok(Some(project.config().await)),
            None => Ok(None),
        }
    }

    pub async fn delete_project(&self, name: &str) -> Result<bool> {
        self.registry.delete(name, &self.cache).await
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectConfig>> {
        self.registry.list().await
    }

    pub async fn project_config(&self, name: &str) -> Result<Option<ProjectConfig>> {
        match self.registry.find(name, &self.cache).await? {
            Some(project) => Ok(Some(project.config().await)),
            None => Ok(None),
        }
    }

    async fn require_project(&self, name: &str) -> Result<Arc<Project>> {
        self.registry
            .find(name, &self.cache)
            .await?
            .ok_or_else(|| Error::NotFound(format!("project '{}'", name)))
    }

    // ── Store operations ──────────────────────────────────────────────

    /// Index a batch of (text, metadata) records produced by the external
    /// ingestion pipeline, then flush the store.
    pub async fn ingest(
        &self,
        name: &str,
        texts: Vec<String>,
        metadatas: Vec<Metadata>,
    ) -> Result<Vec<String>> {
        let project = self.require_project(name).await?;
        let mut store = project.store().write().await;
        let ids = store.add_texts(texts, metadatas).await?;
        store.persist().await?;
        tracing::info!(project = name, chunks = ids.len(), "indexed chunks");
        Ok(ids)
    }

    pub async fn sources(&self, name: &str, filter: SourceFilter) -> Result<SourceList> {
        let project = self.require_project(name).await?;
        let store = project.store().read().await;
        Ok(store.list_sources(filter).await?)
    }

    pub async fn info(&self, name: &str) -> Result<StoreInfo> {
        let project = self.require_project(name).await?;
        let store = project.store().read().await;
        Ok(store.info().await?)
    }

    pub async fn find_source(&self, name: &str, source: &str) -> Result<Vec<StoredChunk>> {
        let project = self.require_project(name).await?;
        let store = project.store().read().await;
        Ok(store.find_by_source(source).await?)
    }

    pub async fn delete_source(&self, name: &str, source: &str) -> Result<Vec<String>> {
        let project = self.require_project(name).await?;
        let mut store = project.store().write().await;
        let ids = store.delete_by_source(source).await?;
        store.persist().await?;
        Ok(ids)
    }

    pub async fn delete_chunk(&self, name: &str, id: &str) -> Result<String> {
        let project = self.require_project(name).await?;
        let mut store = project.store().write().await;
        let deleted = store.delete_by_id(id).await?;
        store.persist().await?;
        Ok(deleted)
    }

    pub async fn reset(&self, name: &str) -> Result<()> {
        self.registry.reset(name, &self.cache).await
    }

    // ── Question / chat ───────────────────────────────────────────────

    /// Answer a one-shot question over a project's corpus.
    pub async fn question(
        &self,
        name: &str,
        question: &str,
        opts: QuestionOptions,
    ) -> Result<String> {
        let project = self.require_project(name).await?;
        let snapshot = project.config().await;

        let llm_name = opts.llm.as_deref().unwrap_or(&snapshot.llm);
        let llm = self.cache.resolve_llm(llm_name, None).await?;

        let chunks = self
            .retrieve_context(&project, question, opts.score_threshold, opts.k)
            .await;

        let system = opts
            .system
            .or(snapshot.system)
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        let messages = vec![
            ChatMessage::system(prompt_with_context(&system, &chunks)),
            ChatMessage::user(question),
        ];

        Ok(llm.complete(&messages).await?)
    }

    /// One conversational turn. History is scoped to `(project, session)`
    /// and the new turn is appended only after generation succeeds.
    pub async fn chat(
        &self,
        name: &str,
        session: &str,
        message: &str,
        opts: ChatOptions,
    ) -> Result<String> {
        let project = self.require_project(name).await?;
        let snapshot = project.config().await;
        let llm = self.cache.resolve_llm(&snapshot.llm, None).await?;

        let chunks = self
            .retrieve_context(&project, message, opts.score_threshold, opts.k)
            .await;

        let system = snapshot
            .system
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        let mut messages = vec![ChatMessage::system(prompt_with_context(&system, &chunks))];
        for (question, answer) in project.chat_history(session).await {
            messages.push(ChatMessage::user(question));
            messages.push(ChatMessage::assistant(answer));
        }
        messages.push(ChatMessage::user(message));

        let answer = llm.complete(&messages).await?;
        project
            .append_chat(session, message.to_string(), answer.clone())
            .await;
        Ok(answer)
    }

    /// Retrieval with the configured defaults. Failures degrade to an
    /// empty context instead of aborting the turn.
    async fn retrieve_context(
        &self,
        project: &Project,
        query: &str,
        score_threshold: Option<f32>,
        k: Option<usize>,
    ) -> Vec<StoredChunk> {
        let threshold = score_threshold.unwrap_or(self.config.retrieval.score_threshold);
        let k = k.unwrap_or(self.config.retrieval.k);

        let store = project.store().read().await;
        match store.retrieve(query, threshold, k).await {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed; answering from empty context");
                Vec::new()
            }
        }
    }
}

fn prompt_with_context(system: &str, chunks: &[StoredChunk]) -> String {
    let context = chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "{}\nConfine your answer to the context below and do not generate beyond it.\n\n\
         Context:\n{}",
        system, context
    )
}
