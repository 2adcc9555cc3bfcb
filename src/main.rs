//! # cloud-search CLI
//!
//! Keeps a full-text search index in sync with a cloud storage account and
//! answers free-text queries against it.
//!
//! ## Usage
//!
//! ```bash
//! cloud-search --config ./config/cloud-search.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cloud-search serve` | Start the HTTP query endpoint |
//! | `cloud-search sync` | Run one sync pass and print a summary |
//! | `cloud-search search "<query>"` | Sync (if enabled), then print matching display paths |
//!
//! Logs go to stderr; set `RUST_LOG` to override `[logging].level`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use cloud_search::config;
use cloud_search::ingest::Orchestrator;
use cloud_search::server;

/// cloud-search: full-text search over a cloud storage account.
#[derive(Parser)]
#[command(
    name = "cloud-search",
    about = "Keep a search index in sync with cloud storage and query it",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cloud-search.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Serves `GET /api/v1/search?q=...` and `GET /health` on
    /// `[server].bind`.
    Serve,

    /// Run a single sync pass.
    ///
    /// Lists the remote account, reconciles the cache and registry, and
    /// updates the search index. Prints a per-pass summary.
    Sync,

    /// Search the index.
    ///
    /// Runs a sync pass first unless `[sync].on_query` is false.
    Search {
        /// Free-text query.
        query: String,

        /// Print full results as JSON instead of display paths.
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_logging(&cfg.logging.level);

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Sync => {
            let orchestrator = Orchestrator::from_config(&cfg)?;
            let report = orchestrator.sync_pass().await?;
            println!("{}", report);
        }
        Commands::Search { query, json } => {
            if query.trim().is_empty() {
                println!("No results.");
                return Ok(());
            }
            let orchestrator = Orchestrator::from_config(&cfg)?;
            let items = orchestrator.query(&query).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else if items.is_empty() {
                println!("No results.");
            } else {
                for item in &items {
                    println!("{}", item.display_path);
                }
            }
        }
    }

    Ok(())
}
