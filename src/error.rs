//! Crate-wide error taxonomy.
//!
//! Lifecycle and resolution failures get typed variants so callers can
//! distinguish "you asked for a model that does not exist" from "the
//! persisted index is unreadable". Backend plumbing stays on [`anyhow`]
//! and is wrapped at the boundary.

use thiserror::Error;

use crate::models::ModelKind;

#[derive(Debug, Error)]
pub enum Error {
    /// No registered model descriptor for this `(kind, name)` pair.
    #[error("unknown {kind} model: {name}")]
    UnknownModel { kind: ModelKind, name: String },

    /// The project's persisted index is corrupt or unreadable.
    #[error("vector store init failed for project '{project}'")]
    StoreInit {
        project: String,
        #[source]
        source: anyhow::Error,
    },

    /// `create` was called for a project name that already exists.
    #[error("project already exists: {0}")]
    DuplicateProject(String),

    /// Named project (or other read target) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
