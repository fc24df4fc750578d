//! Runtime project entity.
//!
//! A [`Project`] pairs a snapshot of its persisted configuration with an
//! attached vector store and the per-session chat history. A project only
//! exists in the registry once its store attached successfully.
//!
//! The store sits behind a `tokio::sync::RwLock`: mutations (add, delete,
//! reset, destroy) take the write half so they serialize against each
//! other, while retrieval and listings share the read half and can never
//! overlap a reset or teardown.

use std::collections::HashMap;

use tokio::sync::{Mutex, RwLock};

use crate::models::ProjectConfig;
use crate::store::VectorStore;

/// One (question, answer) turn in a chat session.
pub type ChatTurn = (String, String);

#[derive(Debug)]
pub struct Project {
    config: RwLock<ProjectConfig>,
    store: RwLock<Box<dyn VectorStore>>,
    chats: Mutex<HashMap<String, Vec<ChatTurn>>>,
}

impl Project {
    pub fn new(config: ProjectConfig, store: Box<dyn VectorStore>) -> Self {
        Self {
            config: RwLock::new(config),
            store: RwLock::new(store),
            chats: Mutex::new(HashMap::new()),
        }
    }

    /// Current configuration snapshot.
    pub async fn config(&self) -> ProjectConfig {
        self.config.read().await.clone()
    }

    /// Replace the configuration snapshot after a persisted edit.
    pub async fn set_config(&self, config: ProjectConfig) {
        *self.config.write().await = config;
    }

    /// The project's store. Readers take the read half; every mutating
    /// operation must take the write half.
    pub fn store(&self) -> &RwLock<Box<dyn VectorStore>> {
        &self.store
    }

    /// History for a chat session, oldest turn first. Unknown sessions
    /// yield an empty history.
    pub async fn chat_history(&self, session: &str) -> Vec<ChatTurn> {
        self.chats
            .lock()
            .await
            .get(session)
            .cloned()
            .unwrap_or_default()
    }

    /// Append a completed turn to a session's history. History is
    /// unbounded here; truncation is the caller's concern.
    pub async fn append_chat(&self, session: &str, question: String, answer: String) {
        self.chats
            .lock()
            .await
            .entry(session.to_string())
            .or_default()
            .push((question, answer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackendKind;

    fn sample_config() -> ProjectConfig {
        ProjectConfig {
            name: "p1".into(),
            embeddings: "e1".into(),
            llm: "m1".into(),
            system: None,
            vectorstore: BackendKind::Local,
        }
    }

    // A store is required to build a Project; chat bookkeeping is
    // exercised through the registry tests where one exists. Here we
    // only verify config snapshot swapping compiles against the lock
    // API, using a trivial store double.
    struct NullStore;

    #[async_trait::async_trait]
    impl VectorStore for NullStore {
        fn backend(&self) -> BackendKind {
            BackendKind::Local
        }
        async fn add_texts(
            &mut self,
            _texts: Vec<String>,
            _metadatas: Vec<crate::store::Metadata>,
        ) -> anyhow::Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn retrieve(
            &self,
            _query: &str,
            _score_threshold: f32,
            _k: usize,
        ) -> anyhow::Result<Vec<crate::models::StoredChunk>> {
            Ok(Vec::new())
        }
        async fn list_sources(
            &self,
            _filter: crate::models::SourceFilter,
        ) -> anyhow::Result<crate::models::SourceList> {
            Ok(Default::default())
        }
        async fn info(&self) -> anyhow::Result<crate::models::StoreInfo> {
            Ok(crate::models::StoreInfo { chunks: 0, metadatas: 0 })
        }
        async fn find_by_source(
            &self,
            _source: &str,
        ) -> anyhow::Result<Vec<crate::models::StoredChunk>> {
            Ok(Vec::new())
        }
        async fn delete_by_source(&mut self, _source: &str) -> anyhow::Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn delete_by_id(&mut self, id: &str) -> anyhow::Result<String> {
            Ok(id.to_string())
        }
        async fn persist(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn destroy(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn config_snapshot_swaps() {
        let project = Project::new(sample_config(), Box::new(NullStore));
        assert_eq!(project.config().await.llm, "m1");

        let mut updated = sample_config();
        updated.llm = "m2".into();
        project.set_config(updated).await;
        assert_eq!(project.config().await.llm, "m2");
    }

    #[tokio::test]
    async fn chat_history_is_per_session() {
        let project = Project::new(sample_config(), Box::new(NullStore));
        assert!(project.chat_history("s1").await.is_empty());

        project.append_chat("s1", "q1".into(), "a1".into()).await;
        project.append_chat("s2", "q2".into(), "a2".into()).await;

        let s1 = project.chat_history("s1").await;
        assert_eq!(s1, vec![("q1".to_string(), "a1".to_string())]);
        assert_eq!(project.chat_history("s2").await.len(), 1);
    }
}
