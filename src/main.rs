//! # docgate CLI
//!
//! The `docgate` binary drives ingestion, retrieval, the review queue and
//! the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! docgate --config ./config/docgate.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docgate init` | Create the SQLite database and apply the schema |
//! | `docgate ingest` | Run the filesystem connector through the pipeline |
//! | `docgate search "<query>"` | Search accepted text |
//! | `docgate review list` | Show documents waiting for a human decision |
//! | `docgate review resolve <id> --action reprocess\|reject` | Resolve a review item |
//! | `docgate document <id>` | Inspect a document with pages, history and chunks |
//! | `docgate reconcile` | Delete or orphan chunks of missing/rejected documents |
//! | `docgate serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! docgate init
//! docgate ingest --limit 100
//! docgate search "pressure relief valve" --mode hybrid --tag site=plant-2
//! docgate review resolve 3f2a... --action reprocess
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docgate::{config, documents, ingest, logging, migrate, reconcile, review, search, server};

/// docgate: quality-gated document extraction with hybrid retrieval.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docgate.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docgate",
    about = "Quality-gated document extraction with hybrid semantic/lexical retrieval",
    version,
    long_about = "docgate assesses scanned and born-digital documents, routes them to the right \
    extraction engine, gates every page on confidence, sends doubtful documents to human review, \
    and indexes accepted text for hybrid search and similarity alerts."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docgate.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Ingest documents from the configured connector.
    Ingest {
        /// Maximum number of documents to fetch.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Search indexed text.
    Search {
        /// The search query string.
        query: String,

        /// Search mode: `vector`, `hybrid`, or `text`. Defaults to
        /// `[retrieval].default_mode`.
        #[arg(long)]
        mode: Option<String>,

        /// Maximum number of results to return.
        #[arg(long)]
        top_k: Option<usize>,

        /// Only return chunks of documents from this source.
        #[arg(long)]
        source: Option<String>,

        /// Only return chunks of documents carrying this tag (`key=value`).
        /// Repeatable.
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Inspect and resolve the human review queue.
    Review {
        #[command(subcommand)]
        action: ReviewCommand,
    },

    /// Show a document with its pages, status history and chunks.
    Document {
        /// Document ID.
        id: String,
    },

    /// Resolve chunks whose document is missing or rejected.
    Reconcile {
        /// `cascade` (delete) or `orphan` (flag and hide). Defaults to
        /// `[pipeline].reconcile_policy`.
        #[arg(long)]
        policy: Option<String>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum ReviewCommand {
    /// List open review items.
    List,
    /// Resolve the review item of a document.
    Resolve {
        /// Document ID.
        id: String,

        /// `reprocess` (back to pending) or `reject` (final).
        #[arg(long)]
        action: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_tracing(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { limit } => {
            ingest::run_ingest(&cfg, limit).await?;
        }
        Commands::Search {
            query,
            mode,
            top_k,
            source,
            tags,
        } => {
            search::run_search(&cfg, &query, mode, top_k, source, tags).await?;
        }
        Commands::Review { action } => match action {
            ReviewCommand::List => review::run_review_list(&cfg).await?,
            ReviewCommand::Resolve { id, action } => {
                review::run_review_resolve(&cfg, &id, &action).await?
            }
        },
        Commands::Document { id } => {
            documents::run_document(&cfg, &id).await?;
        }
        Commands::Reconcile { policy } => {
            reconcile::run_reconcile(&cfg, policy).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
