//! # ragbrain CLI
//!
//! Administrative front end for the RAG core: project lifecycle, chunk
//! ingestion, source management, and one-shot question/chat turns.
//!
//! ```bash
//! ragbrain --config ./config/ragbrain.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragbrain create <name>` | Create a project (embeddings, llm, backend) |
//! | `ragbrain list` | List persisted projects |
//! | `ragbrain edit <name>` | Change a project's llm or system prompt |
//! | `ragbrain delete <name>` | Delete a project and its index |
//! | `ragbrain ingest <name> <file>` | Index JSONL `{text, metadata}` records |
//! | `ragbrain sources <name>` | List distinct sources (urls vs other) |
//! | `ragbrain info <name>` | Chunk/metadata counts |
//! | `ragbrain find <name> <source>` | Show chunks for one source |
//! | `ragbrain forget <name> <source>` | Delete all chunks for one source |
//! | `ragbrain reset <name>` | Wipe and re-create the project's index |
//! | `ragbrain ask <name> "<q>"` | One-shot question |
//! | `ragbrain chat <name> "<msg>"` | Conversational turn (named session) |

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ragbrain::brain::{Brain, ChatOptions, QuestionOptions};
use ragbrain::cache::ModelRegistry;
use ragbrain::config::{load_config, Config};
use ragbrain::db::SqliteProjectRepository;
use ragbrain::models::{BackendKind, ProjectConfig, ProjectUpdate, SourceFilter};
use ragbrain::store::Metadata;

#[derive(Parser)]
#[command(
    name = "ragbrain",
    about = "Project-scoped retrieval-augmented-generation core",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Missing file falls back to
    /// defaults plus environment overrides.
    #[arg(long, global = true, default_value = "./config/ragbrain.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new project.
    Create {
        name: String,
        /// Logical embedding model name (from `[models.embeddings]`).
        #[arg(long)]
        embeddings: String,
        /// Logical language model name (from `[models.llms]`).
        #[arg(long)]
        llm: String,
        /// Optional system prompt.
        #[arg(long)]
        system: Option<String>,
        /// Vector store backend: document, local, or redis.
        #[arg(long, default_value = "local")]
        vectorstore: BackendKind,
    },

    /// List persisted projects.
    List,

    /// Edit a project's language model or system prompt.
    Edit {
        name: String,
        #[arg(long)]
        llm: Option<String>,
        /// New system prompt; pass an empty string to clear it.
        #[arg(long)]
        system: Option<String>,
    },

    /// Delete a project, its configuration row, and its index.
    Delete { name: String },

    /// Index JSONL records of the form `{"text": ..., "metadata": {...}}`.
    Ingest { name: String, file: PathBuf },

    /// List the distinct sources indexed for a project.
    Sources {
        name: String,
        /// Which partition to show: all, urls, or other.
        #[arg(long, default_value = "all")]
        filter: String,
    },

    /// Show chunk and metadata counts.
    Info { name: String },

    /// Show the chunks stored for one exact source.
    Find { name: String, source: String },

    /// Delete every chunk for one source.
    Forget { name: String, source: String },

    /// Destroy and re-create the project's index.
    Reset { name: String },

    /// Ask a one-shot question.
    Ask {
        name: String,
        question: String,
        #[arg(long)]
        llm: Option<String>,
        #[arg(long)]
        system: Option<String>,
        #[arg(long)]
        score: Option<f32>,
        #[arg(long)]
        k: Option<usize>,
    },

    /// One conversational turn in a named session.
    Chat {
        name: String,
        message: String,
        #[arg(long, default_value = "default")]
        session: String,
        #[arg(long)]
        score: Option<f32>,
        #[arg(long)]
        k: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_tracing(&config);

    let repo = Arc::new(SqliteProjectRepository::open(&config.db.path).await?);
    let models = ModelRegistry::from_config(&config)?;
    let brain = Brain::new(config, models, repo);

    match cli.command {
        Commands::Create {
            name,
            embeddings,
            llm,
            system,
            vectorstore,
        } => {
            let created = brain
                .create_project(ProjectConfig {
                    name,
                    embeddings,
                    llm,
                    system,
                    vectorstore,
                })
                .await?;
            println!("created project {} ({})", created.name, created.vectorstore);
        }

        Commands::List => {
            for project in brain.list_projects().await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    project.name, project.vectorstore, project.embeddings, project.llm
                );
            }
        }

        Commands::Edit { name, llm, system } => {
            match brain
                .edit_project(&name, ProjectUpdate { llm, system })
                .await?
            {
                Some(updated) => println!(
                    "{}: llm={} system={}",
                    updated.name,
                    updated.llm,
                    updated.system.as_deref().unwrap_or("-")
                ),
                None => println!("no such project: {}", name),
            }
        }

        Commands::Delete { name } => {
            if brain.delete_project(&name).await? {
                println!("deleted {}", name);
            } else {
                println!("no such project: {}", name);
            }
        }

        Commands::Ingest { name, file } => {
            let (texts, metadatas) = read_jsonl(&file)?;
            let ids = brain.ingest(&name, texts, metadatas).await?;
            println!("indexed {} chunks", ids.len());
        }

        Commands::Sources { name, filter } => {
            let filter = parse_filter(&filter)?;
            let sources = brain.sources(&name, filter).await?;
            for url in &sources.urls {
                println!("url\t{}", url);
            }
            for other in &sources.other {
                println!("other\t{}", other);
            }
        }

        Commands::Info { name } => {
            let info = brain.info(&name).await?;
            println!("chunks: {}, metadatas: {}", info.chunks, info.metadatas);
        }

        Commands::Find { name, source } => {
            for chunk in brain.find_source(&name, &source).await? {
                println!("{}\t{}", chunk.id, chunk.content.replace('\n', " "));
            }
        }

        Commands::Forget { name, source } => {
            let ids = brain.delete_source(&name, &source).await?;
            println!("deleted {} chunks", ids.len());
        }

        Commands::Reset { name } => {
            brain.reset(&name).await?;
            println!("reset {}", name);
        }

        Commands::Ask {
            name,
            question,
            llm,
            system,
            score,
            k,
        } => {
            let answer = brain
                .question(
                    &name,
                    &question,
                    QuestionOptions {
                        llm,
                        system,
                        score_threshold: score,
                        k,
                    },
                )
                .await?;
            println!("{}", answer);
        }

        Commands::Chat {
            name,
            message,
            session,
            score,
            k,
        } => {
            let answer = brain
                .chat(
                    &name,
                    &session,
                    &message,
                    ChatOptions {
                        score_threshold: score,
                        k,
                    },
                )
                .await?;
            println!("{}", answer);
        }
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::debug!(
        anonymized_telemetry = config.anonymized_telemetry,
        "configuration loaded"
    );
}

fn parse_filter(raw: &str) -> Result<SourceFilter> {
    match raw {
        "all" => Ok(SourceFilter::All),
        "url" | "urls" => Ok(SourceFilter::Urls),
        "other" => Ok(SourceFilter::Other),
        other => anyhow::bail!("unknown source filter: {} (use all, urls, or other)", other),
    }
}

/// Read `{"text": ..., "metadata": {...}}` records, one per line.
fn read_jsonl(path: &PathBuf) -> Result<(Vec<String>, Vec<Metadata>)> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut texts = Vec::new();
    let mut metadatas = Vec::new();

    for (lineno, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid JSON", path.display(), lineno + 1))?;
        let text = record
            .get("text")
            .and_then(|t| t.as_str())
            .with_context(|| format!("{}:{}: missing 'text'", path.display(), lineno + 1))?;
        let metadata = match record.get("metadata") {
            Some(serde_json::Value::Object(map)) => map.clone(),
            _ => Metadata::new(),
        };
        texts.push(text.to_string());
        metadatas.push(metadata);
    }

    Ok((texts, metadatas))
}
