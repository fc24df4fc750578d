//! # ragbrain
//!
//! A project-scoped retrieval-augmented-generation core.
//!
//! Each named project binds an embedding model, a language model, and a
//! vector store backend. Questions and chats retrieve relevant chunks
//! from the project's index and hand them to a language model; ingestion,
//! listing, and deletion go through one uniform store contract regardless
//! of backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────┐   ┌───────────────────────┐
//! │ HandleCache  │   │ ProjectRegistry │   │  VectorStore trait    │
//! │ embed / llm  │◀──│ lazy hydration  │──▶│ document│local│redis  │
//! └──────┬───────┘   └───────┬────────┘   └───────────────────────┘
//!        │                   │
//!        └────────┬──────────┘
//!                 ▼
//!            ┌─────────┐
//!            │  Brain  │  question / chat / ingest / lifecycle
//!            └─────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with env overrides |
//! | [`error`] | Typed error taxonomy |
//! | [`models`] | Core data types |
//! | [`cache`] | Model registry and process-wide handle cache |
//! | [`embedding`] | Embedding handles (OpenAI-compatible, local) |
//! | [`llm`] | Language model handles |
//! | [`paths`] | Versioned per-project index directories |
//! | [`db`] | Relational project store (narrow CRUD) |
//! | [`store`] | Vector store contract + the three backends |
//! | [`project`] | Runtime project entity |
//! | [`registry`] | Live project table with deduped hydration |
//! | [`brain`] | Question/chat orchestration |

pub mod brain;
pub mod cache;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod models;
pub mod paths;
pub mod project;
pub mod registry;
pub mod store;
