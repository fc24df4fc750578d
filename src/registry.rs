//! Live project registry.
//!
//! Bridges persisted project configuration to initialized runtime
//! [`Project`]s. The table starts empty at process start and fills by
//! lazy hydration: the first `find` for a name loads its config row,
//! attaches the vector store, and registers the result. Hydration is
//! deduplicated with a per-name async mutex — concurrent lookups for a
//! cold name block on one in-flight attach and all observe the same
//! `Arc<Project>`.
//!
//! The registry owns the only strong references handed out for live
//! projects; `delete` unregisters, removes the persisted row, and tears
//! down storage, and stays correct when the project was never (or only
//! partially) hydrated.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::cache::HandleCache;
use crate::config::Config;
use crate::db::ProjectRepository;
use crate::error::{Error, Result};
use crate::models::{ProjectConfig, ProjectUpdate};
use crate::paths;
use crate::project::Project;
use crate::store::{self, VectorStore as _};

pub struct ProjectRegistry {
    config: Config,
    repo: Arc<dyn ProjectRepository>,
    projects: RwLock<HashMap<String, Arc<Project>>>,
    hydration: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProjectRegistry {
    pub fn new(config: Config, repo: Arc<dyn ProjectRepository>) -> Self {
        Self {
            config,
            repo,
            projects: RwLock::new(HashMap::new()),
            hydration: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn hydration_guard(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut guards = self.hydration.lock().expect("hydration lock poisoned");
        guards
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Look up a project, hydrating it from the persisted config on a
    /// cold miss. Returns `None` when no such project is persisted.
    pub async fn find(&self, name: &str, cache: &HandleCache) -> Result<Option<Arc<Project>>> {
        if let Some(project) = self.projects.read().await.get(name) {
            return Ok(Some(project.clone()));
        }

        let guard = self.hydration_guard(name);
        let _held = guard.lock().await;

        // Someone else may have hydrated while we waited.
        if let Some(project) = self.projects.read().await.get(name) {
            return Ok(Some(project.clone()));
        }

        let Some(row) = self.repo.get_by_name(name).await? else {
            return Ok(None);
        };
        let project = self.hydrate(row, cache).await?;
        Ok(Some(project))
    }

    /// Persist a new project and register it. Fails with
    /// [`Error::DuplicateProject`] when the name is taken, and with
    /// [`Error::StoreInit`] when storage cannot be attached (in which
    /// case the row is persisted but nothing is registered — a later
    /// `delete` cleans it up).
    pub async fn create(
        &self,
        config: ProjectConfig,
        cache: &HandleCache,
    ) -> Result<Arc<Project>> {
        let guard = self.hydration_guard(&config.name);
        let _held = guard.lock().await;

        self.repo.create(&config).await?;
        tracing::info!(project = %config.name, backend = %config.vectorstore, "project created");
        self.hydrate(config, cache).await
    }

    /// Attach storage for `row` and register the resulting project.
    /// Caller must hold the hydration guard for the name.
    async fn hydrate(&self, row: ProjectConfig, cache: &HandleCache) -> Result<Arc<Project>> {
        let name = row.name.clone();
        let attached = store::attach(&self.config, &row, cache).await?;
        let project = Arc::new(Project::new(row, attached));
        self.projects
            .write()
            .await
            .insert(name, project.clone());
        Ok(project)
    }

    /// Apply a partial update. Only `llm` and `system` can change; the
    /// row is rewritten only when something actually differs. An empty
    /// `system` string clears the prompt.
    pub async fn edit(
        &self,
        name: &str,
        update: ProjectUpdate,
        cache: &HandleCache,
    ) -> Result<Option<Arc<Project>>> {
        let Some(project) = self.find(name, cache).await? else {
            return Ok(None);
        };

        let mut snapshot = project.config().await;
        let mut changed = false;

        if let Some(llm) = &update.llm {
            if *llm != snapshot.llm {
                snapshot.llm = llm.clone();
                changed = true;
            }
        }
        if let Some(system) = &update.system {
            let desired = if system.is_empty() {
                None
            } else {
                Some(system.clone())
            };
            if desired != snapshot.system {
                snapshot.system = desired;
                changed = true;
            }
        }

        if changed {
            self.repo.update(&snapshot).await?;
            project.set_config(snapshot).await;
        }

        Ok(Some(project))
    }

    /// Remove the persisted row, drop the project's storage, and
    /// unregister it. Returns `false` when nothing existed under the
    /// name. Tolerates projects whose storage never attached.
    pub async fn delete(&self, name: &str, cache: &HandleCache) -> Result<bool> {
        let guard = self.hydration_guard(name);
        let _held = guard.lock().await;

        let live = self.projects.read().await.get(name).cloned();

        match live {
            Some(project) => {
                let mut store = project.store().write().await;
                if let Err(e) = store.destroy().await {
                    tracing::warn!(project = name, error = %e, "store teardown failed");
                }
            }
            None => {
                // Not hydrated. If a row exists, try to attach just to
                // tear the storage down properly; fall back to removing
                // the index directory.
                if let Some(row) = self.repo.get_by_name(name).await? {
                    match store::attach(&self.config, &row, cache).await {
                        Ok(mut attached) => {
                            if let Err(e) = attached.destroy().await {
                                tracing::warn!(project = name, error = %e, "store teardown failed");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(project = name, error = %e, "attach for teardown failed; removing index directory");
                            if let Some(dir) =
                                paths::resolve_index_dir(&self.config.storage.embeddings_path, name)
                            {
                                let _ = std::fs::remove_dir_all(dir);
                            }
                        }
                    }
                }
            }
        }

        let row_removed = self.repo.delete(name).await?;
        let was_live = self.projects.write().await.remove(name).is_some();
        self.hydration
            .lock()
            .expect("hydration lock poisoned")
            .remove(name);

        if row_removed || was_live {
            tracing::info!(project = name, "project deleted");
        }
        Ok(row_removed || was_live)
    }

    /// All persisted project configurations.
    pub async fn list(&self) -> Result<Vec<ProjectConfig>> {
        self.repo.list().await
    }

    /// Reset a project's store: destroy indexed content and re-attach a
    /// fresh empty store under the write lock.
    pub async fn reset(&self, name: &str, cache: &HandleCache) -> Result<()> {
        let project = self
            .find(name, cache)
            .await?
            .ok_or_else(|| Error::NotFound(format!("project '{}'", name)))?;
        let snapshot = project.config().await;
        let mut store = project.store().write().await;
        store::reset(&mut store, &self.config, &snapshot, cache).await
    }
}
