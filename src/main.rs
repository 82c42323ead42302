//! # Intake CLI (`intake`)
//!
//! Operator interface for the ingestion resilience core: database
//! initialization, candidate-item validation, failure-queue inspection
//! and maintenance, and collision-registry cleanup.
//!
//! ## Usage
//!
//! ```bash
//! intake --config ./config/intake.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `intake init` | Create the SQLite database and run schema migrations |
//! | `intake validate <file.json>` | Validate candidate items from a JSON file |
//! | `intake queue stats` | Show failure-queue status/priority breakdown |
//! | `intake queue cleanup` | Delete old terminal (completed/failed) items |
//! | `intake queue cancel <id>` | Cancel a pending or in-flight item |
//! | `intake queue rearm <id>` | Reset an item to pending with a fresh attempt budget |
//! | `intake registry cleanup` | Drop registry entries whose file is gone |

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use intake::collision::CollisionResolver;
use intake::config::{load_config, Config};
use intake::identity;
use intake::models::CandidateItem;
use intake::queue::FailureQueue;
use intake::validate::Validator;
use intake::{db, migrate, stats};

/// Intake — ingestion resilience and content-identity core.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/intake.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "intake",
    about = "Intake — ingestion resilience and content-identity core",
    version,
    long_about = "Intake gives content items deterministic dedup identity, gates them through \
    per-kind validation, assigns collision-safe storage names, and keeps failed work in a \
    durable priority queue with backoff-based retry."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/intake.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file, the failure queue, and the
    /// collision registry. Idempotent — running it multiple times is safe.
    Init,

    /// Validate candidate items from a JSON file.
    ///
    /// The file holds either a single item object or an array of items.
    /// Prints each item's verdict (errors reject, warnings annotate) and,
    /// for arrays, an aggregate summary.
    Validate {
        /// Path to the JSON file.
        file: PathBuf,
    },

    /// Failure-queue operations.
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Collision-registry operations.
    Registry {
        #[command(subcommand)]
        command: RegistryCommands,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Show status/priority breakdown and backlog age.
    Stats,
    /// Delete terminal (completed/failed) items older than the retention
    /// window. Never touches pending or in-flight items.
    Cleanup {
        /// Override the configured retention window.
        #[arg(long)]
        days: Option<i64>,
    },
    /// Cancel a pending or in-flight item. In-flight work is not
    /// preempted; cancellation only prevents future dequeuing.
    Cancel { id: String },
    /// Reset an item to pending with attempt_count = 0.
    Rearm { id: String },
}

#[derive(Subcommand)]
enum RegistryCommands {
    /// Drop registry entries whose resolved file no longer exists on disk.
    Cleanup,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Validate { file } => run_validate(&config, &file),
        Commands::Queue { command } => run_queue(&config, command).await,
        Commands::Registry { command } => run_registry(&config, command).await,
    }
}

async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    println!("initialized {}", config.db.path.display());
    Ok(())
}

fn run_validate(config: &Config, file: &PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let items: Vec<CandidateItem> = if content.trim_start().starts_with('[') {
        serde_json::from_str(&content).with_context(|| "Failed to parse item array")?
    } else {
        vec![serde_json::from_str(&content).with_context(|| "Failed to parse item")?]
    };

    let validator = Validator::new(config.validation.clone());
    let (results, summary) = validator.validate_batch(&items);

    for (item, result) in items.iter().zip(&results) {
        let verdict = if result.is_valid { "valid" } else { "INVALID" };
        println!("{}  {} ({})", verdict, item.id, item.kind);
        for error in &result.errors {
            println!("    error: {}", error);
        }
        for warning in &result.warnings {
            println!("    warning: {}", warning);
        }
        let ident = identity::create_identifier(
            &item.title,
            &item.body,
            item.url.as_deref(),
            item.guid.as_deref(),
        );
        println!("    content_hash: {}", ident.content_hash);
    }

    println!();
    println!(
        "checked {}: {} valid, {} invalid ({:.0}% ok)",
        summary.total,
        summary.valid,
        summary.invalid,
        summary.success_rate * 100.0
    );
    if !summary.top_error_categories.is_empty() {
        let categories: Vec<String> = summary
            .top_error_categories
            .iter()
            .map(|(c, n)| format!("{} ({})", c, n))
            .collect();
        println!("top errors: {}", categories.join(", "));
    }
    println!("ok");
    Ok(())
}

async fn run_queue(config: &Config, command: QueueCommands) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let queue = FailureQueue::with_config(pool.clone(), &config.queue);

    match command {
        QueueCommands::Stats => {
            let queue_stats = stats::queue_stats(&pool).await?;
            stats::print_queue_stats(&queue_stats);
        }
        QueueCommands::Cleanup { days } => {
            let days = days.unwrap_or(config.queue.retention_days);
            let removed = queue.cleanup_old_items(days).await?;
            println!("removed {} items older than {} days", removed, days);
            println!("ok");
        }
        QueueCommands::Cancel { id } => {
            queue.cancel_item(&id).await?;
            println!("cancelled {}", id);
            println!("ok");
        }
        QueueCommands::Rearm { id } => {
            queue.rearm_item(&id).await?;
            println!("re-armed {}", id);
            println!("ok");
        }
    }

    pool.close().await;
    Ok(())
}

async fn run_registry(config: &Config, command: RegistryCommands) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;

    match command {
        RegistryCommands::Cleanup => {
            let resolver = CollisionResolver::new(pool.clone(), config.collision.clone());
            let removed = resolver.cleanup_registry().await?;
            println!("removed {} stale registry entries", removed);
            println!("ok");
        }
    }

    pool.close().await;
    Ok(())
}
