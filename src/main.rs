//! # normcheck CLI
//!
//! ## Usage
//!
//! ```bash
//! normcheck --config ./config/normcheck.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `normcheck process` | Ingest the standards directory (cached unless changed) |
//! | `normcheck query "<text>"` | Show the most relevant standard passages |
//! | `normcheck check <file>` | Check a plan (PDF or text) and print the JSON result |
//! | `normcheck info` | Retrieval mode and cache state |
//! | `normcheck stats` | Plan, feedback and corpus statistics |
//! | `normcheck budget` | Monthly token budget status |
//! | `normcheck serve` | Start the HTTP API |

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use normcheck::config;
use normcheck::server;
use normcheck::service::Checker;

#[derive(Parser)]
#[command(
    name = "normcheck",
    about = "Check construction plans against DIN standards",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/normcheck.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract, segment and index the standards directory.
    ///
    /// Skipped when the manifest matches the files on disk.
    Process {
        /// Rebuild even when the cache is current.
        #[arg(long)]
        force: bool,
    },

    /// Retrieve the standard passages most relevant to a text.
    Query {
        text: String,

        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Check a plan file against the indexed standards.
    Check {
        /// PDF or plain-text plan.
        file: PathBuf,
    },

    /// Show the retrieval mode and whether the cache is current.
    Info,

    /// Show plan, feedback and corpus statistics.
    Stats,

    /// Show this month's token usage against the budget.
    Budget,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;
    let checker = Arc::new(Checker::from_config(cfg));

    match cli.command {
        Commands::Process { force } => {
            let report = checker.process_standards(force).await?;
            println!("files found: {}", report.files_found);
            println!("processed: {}", report.processed);
            println!("skipped: {}", report.skipped.len());
            for name in &report.skipped {
                println!("  - {}", name);
            }
            println!("segments: {}", report.segments);
            println!("cached: {}", report.cached);
            println!("mode: {}", report.mode);
        }
        Commands::Query { text, limit } => {
            if limit == 0 {
                anyhow::bail!("--limit must be >= 1");
            }
            let hits = checker.find_relevant(&text, limit).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.4}] {} #{}",
                    i + 1,
                    hit.score,
                    hit.document_id,
                    hit.chunk_index
                );
                println!("    {}", hit.content.replace('\n', " "));
            }
        }
        Commands::Check { file } => {
            let text = checker
                .read_plan_file(&file)
                .await
                .with_context(|| format!("Failed to read plan {}", file.display()))?;
            let result = checker.check_plan_text(&text).await;
            print_json(&result)?;
        }
        Commands::Info => print_json(&checker.processing_info().await?)?,
        Commands::Stats => print_json(&checker.statistics().await?)?,
        Commands::Budget => print_json(&checker.budget_status().await?)?,
        Commands::Serve => server::run_server(checker).await?,
    }

    Ok(())
}
