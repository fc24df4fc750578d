//! Relational project store.
//!
//! Project configuration rows live in an external relational database,
//! reached through the narrow [`ProjectRepository`] interface. The rest of
//! the core never sees SQL — it only reads and writes [`ProjectConfig`]
//! records. The shipped implementation is SQLite via sqlx.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::models::{BackendKind, ProjectConfig};

/// CRUD surface over persisted project configuration.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn get_by_name(&self, name: &str) -> Result<Option<ProjectConfig>>;
    async fn list(&self) -> Result<Vec<ProjectConfig>>;
    /// Fails with [`Error::DuplicateProject`] when the name is taken.
    async fn create(&self, config: &ProjectConfig) -> Result<()>;
    /// Persists the mutable fields (`llm`, `system`) of an existing row.
    async fn update(&self, config: &ProjectConfig) -> Result<()>;
    /// Returns `false` when no row with that name existed.
    async fn delete(&self, name: &str) -> Result<bool>;
}

/// SQLite-backed [`ProjectRepository`].
pub struct SqliteProjectRepository {
    pool: SqlitePool,
}

impl SqliteProjectRepository {
    /// Open (creating if missing) the project database at `path` and run
    /// the idempotent schema migration.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open project database {}", path.display()))?;

        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                name TEXT PRIMARY KEY,
                embeddings TEXT NOT NULL,
                llm TEXT NOT NULL,
                system TEXT,
                vectorstore TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_config(row: &sqlx::sqlite::SqliteRow) -> Result<ProjectConfig> {
    let vectorstore: String = row.get("vectorstore");
    Ok(ProjectConfig {
        name: row.get("name"),
        embeddings: row.get("embeddings"),
        llm: row.get("llm"),
        system: row.get("system"),
        vectorstore: vectorstore.parse::<BackendKind>()?,
    })
}

#[async_trait]
impl ProjectRepository for SqliteProjectRepository {
    async fn get_by_name(&self, name: &str) -> Result<Option<ProjectConfig>> {
        let row = sqlx::query(
            "SELECT name, embeddings, llm, system, vectorstore FROM projects WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        row.as_ref().map(row_to_config).transpose()
    }

    async fn list(&self) -> Result<Vec<ProjectConfig>> {
        let rows = sqlx::query(
            "SELECT name, embeddings, llm, system, vectorstore FROM projects ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        rows.iter().map(row_to_config).collect()
    }

    async fn create(&self, config: &ProjectConfig) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO projects (name, embeddings, llm, system, vectorstore, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&config.name)
        .bind(&config.embeddings)
        .bind(&config.llm)
        .bind(&config.system)
        .bind(config.vectorstore.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let duplicate = e
                    .as_database_error()
                    .map(|d| d.is_unique_violation())
                    .unwrap_or(false);
                if duplicate {
                    Err(Error::DuplicateProject(config.name.clone()))
                } else {
                    Err(Error::Other(e.into()))
                }
            }
        }
    }

    async fn update(&self, config: &ProjectConfig) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE projects SET llm = ?, system = ?, updated_at = ? WHERE name = ?",
        )
        .bind(&config.llm)
        .bind(&config.system)
        .bind(now)
        .bind(&config.name)
        .execute(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("project '{}'", config.name)));
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM projects WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(result.rows_affected() > 0)
    }
}
