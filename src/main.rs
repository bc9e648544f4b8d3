//! # Paperweave CLI (`pw`)
//!
//! ## Usage
//!
//! ```bash
//! pw --config ./config/paperweave.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pw init` | Create the SQLite database and run schema migrations |
//! | `pw run` | Scan, extract, classify, archive and rebuild the graph |
//! | `pw graph rebuild` | Rebuild the relationship graph |
//! | `pw list <subject>` | List documents filed under a subject |
//! | `pw search "<query>"` | Search titles and author names |
//! | `pw get <id>` | Show one document |
//! | `pw subgraph <subject>` | Print a subject's subgraph as JSON |
//! | `pw stats` | Show catalog statistics |
//! | `pw export` | Export the graph as JSON |
//! | `pw recover` | Reconcile the archive after an interrupted run |

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use paperweave::catalog::Catalog;
use paperweave::pipeline::BatchOptions;
use paperweave::{config, export, get, graph, organizer, pipeline, search, stats};

/// Paperweave CLI: a local-first literature corpus pipeline.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "pw",
    about = "Paperweave: classify, archive and link a PDF literature corpus",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/paperweave.toml")]
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

    /// Run one batch over the input directory.
    ///
    /// Ctrl-C stops after in-flight documents; nothing is left half done.
    Run {
        /// Re-extract and reclassify every document.
        #[arg(long)]
        reprocess: bool,

        /// Process at most N documents.
        #[arg(long)]
        limit: Option<usize>,

        /// Rebuild the graph in full.
        #[arg(long)]
        full_graph: bool,
    },

    /// Relationship graph maintenance.
    Graph {
        #[command(subcommand)]
        action: GraphAction,
    },

    /// List documents in a subject.
    List {
        subject: String,

        /// Include documents of descendant subjects.
        #[arg(long)]
        recursive: bool,
    },

    /// Search by title or author substring.
    Search {
        query: String,

        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Show document detail.
    Get { id: i64 },

    /// Print the subgraph of one subject as JSON.
    Subgraph { subject: String },

    /// Show catalog statistics.
    Stats,

    /// Export the graph as JSON.
    Export {
        /// Output file path (default: stdout).
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Run the crash-recovery pass.
    Recover,
}

#[derive(Subcommand)]
enum GraphAction {
    /// Recompute edges for changed documents, or everything with `--full`.
    Rebuild {
        #[arg(long)]
        full: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let catalog = Catalog::open(&cfg).await?;
            catalog.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Run {
            reprocess,
            limit,
            full_graph,
        } => {
            pipeline::run_batch(
                &cfg,
                BatchOptions {
                    reprocess,
                    limit,
                    full_graph,
                },
            )
            .await?;
        }
        Commands::Graph {
            action: GraphAction::Rebuild { full },
        } => {
            graph::run_graph_rebuild(&cfg, full).await?;
        }
        Commands::List { subject, recursive } => {
            search::run_list(&cfg, &subject, recursive).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, id).await?;
        }
        Commands::Subgraph { subject } => {
            export::run_subgraph(&cfg, &subject).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Export { output } => {
            export::run_export(&cfg, output.as_deref()).await?;
        }
        Commands::Recover => {
            organizer::run_recover(&cfg).await?;
        }
    }

    Ok(())
}
