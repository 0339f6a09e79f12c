//! # RAG QA CLI (`rag-qa`)
//!
//! ## Usage
//!
//! ```bash
//! rag-qa --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag-qa serve` | Load or build the index and start the HTTP API |
//! | `rag-qa ask "<question>"` | Answer one question and print the result as JSON |
//! | `rag-qa index status` | Load or build the index and print its statistics |
//! | `rag-qa index rebuild` | Re-chunk and re-embed the document into a fresh index |
//!
//! A `.env` file in the working directory is loaded before the config, so
//! `BASE_URL`, `API_KEY`, and the other overrides can live there.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use rag_qa::config::{self, Config};
use rag_qa::embedding;
use rag_qa::generation::{GenerationClient, OpenAiChatClient};
use rag_qa::logging;
use rag_qa::pipeline::RagPipeline;
use rag_qa::server;

/// Question answering over a knowledge document with retrieval-augmented
/// generation.
#[derive(Parser)]
#[command(name = "rag-qa", version, about)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    /// Debug-level logging (ignored when RUST_LOG is set).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API on `[server].bind`.
    Serve {
        /// Override the bind address from config.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Answer a single question.
    Ask {
        question: String,

        /// Include the retrieved passages in the output.
        #[arg(long)]
        context: bool,
    },

    /// Inspect or rebuild the vector index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Print statistics for the active index.
    Status,
    /// Rebuild the index from the current document.
    Rebuild,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose)?;

    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "failed to load .env"),
    }

    let config = config::load_config(&cli.config)
        .with_context(|| format!("invalid configuration in {}", cli.config.display()))?;

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let pipeline = Arc::new(open_pipeline(config).await?);
            server::run_server(pipeline, &bind).await?;
        }
        Commands::Ask { question, context } => {
            if question.trim().is_empty() {
                anyhow::bail!("question must not be empty");
            }
            let pipeline = open_pipeline(config).await?;
            let result = pipeline.query(&question, context).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.is_error() {
                std::process::exit(1);
            }
        }
        Commands::Index { action } => {
            let pipeline = open_pipeline(config).await?;
            let stats = match action {
                IndexAction::Status => pipeline.index_stats().await,
                IndexAction::Rebuild => pipeline.rebuild_index().await?,
            };
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

async fn open_pipeline(config: Config) -> anyhow::Result<RagPipeline> {
    let provider = embedding::create_provider(&config.embedding)?;
    let generator: Arc<dyn GenerationClient> =
        Arc::new(OpenAiChatClient::new(&config.generation)?);
    Ok(RagPipeline::open(config, provider, generator).await?)
}
