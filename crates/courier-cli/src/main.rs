//! courier - operator CLI for history stores
//!
//! Usage:
//!   courier --data-dir <dir> histories --topic 0x01000000
//!   courier --data-dir <dir> requests
//!   courier --data-dir <dir> compact
//!   courier --data-dir <dir> repair
//!   courier --config courier.toml requests

use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};
use courier_history::{HistoryStore, TopicHistory, TopicType};
use courier_kv::{DiskStorage, StorageOptions};
use std::path::{Path, PathBuf};
use tracing::info;

mod config;

use config::CourierConfig;

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Inspect and maintain courier history stores", long_about = None)]
#[command(version)]
struct Cli {
    /// Store directory (overrides data_dir from the config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every cursor stored for a topic
    Histories {
        /// Topic as 4 hex bytes, e.g. 0x01000000
        #[arg(long)]
        topic: TopicType,
    },
    /// List every outstanding history request
    Requests,
    /// Snapshot the store and reset its WAL
    Compact,
    /// Salvage a damaged store
    Repair,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = CourierConfig::load_or_default(cli.config.as_deref())?;
    let data_dir = config.resolve_data_dir(cli.data_dir)?;
    let options = config.storage;

    match cli.command {
        Commands::Histories { topic } => list_histories(&data_dir, options, topic),
        Commands::Requests => list_requests(&data_dir, options),
        Commands::Compact => compact(&data_dir, options),
        Commands::Repair => repair(&data_dir, &options),
    }
}

/// Inspection and compaction never create a store
fn ensure_store_dir(data_dir: &Path) -> Result<()> {
    if !data_dir.is_dir() {
        anyhow::bail!("No store at {}", data_dir.display());
    }
    Ok(())
}

fn open_store(data_dir: &Path, options: StorageOptions) -> Result<HistoryStore> {
    ensure_store_dir(data_dir)?;
    let storage = courier_kv::open(data_dir, options)
        .with_context(|| format!("Failed to open store at {}", data_dir.display()))?;
    Ok(HistoryStore::new(storage))
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.num_seconds();
    match secs {
        s if s != 0 && s % 86_400 == 0 => format!("{}d", s / 86_400),
        s if s != 0 && s % 3_600 == 0 => format!("{}h", s / 3_600),
        s if s != 0 && s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}

fn format_history(th: &TopicHistory) -> String {
    let current = th
        .current
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never synced".to_string());
    format!("{}  {:>6}  {}", th.topic, format_duration(th.duration), current)
}

fn list_histories(data_dir: &Path, options: StorageOptions, topic: TopicType) -> Result<()> {
    let store = open_store(data_dir, options)?;
    let histories = store
        .get_histories_by_topic(topic)
        .with_context(|| format!("Failed to read histories of {}", topic))?;

    if histories.is_empty() {
        println!("No histories for {}", topic);
        return Ok(());
    }
    for th in &histories {
        println!("{}", format_history(th));
    }
    Ok(())
}

fn list_requests(data_dir: &Path, options: StorageOptions) -> Result<()> {
    let store = open_store(data_dir, options)?;
    let requests = store.get_all_requests().context("Failed to read requests")?;

    println!("{} request(s)", requests.len());
    for req in &requests {
        println!("{}", req.id);
        for th in req.histories() {
            println!("  {}", format_history(th));
        }
    }
    Ok(())
}

fn compact(data_dir: &Path, options: StorageOptions) -> Result<()> {
    ensure_store_dir(data_dir)?;
    let storage = DiskStorage::open(data_dir, options).with_context(|| {
        format!(
            "Failed to open {} (run `courier repair` if it is damaged)",
            data_dir.display()
        )
    })?;
    storage.compact().context("Compaction failed")?;

    info!("Compacted {}", data_dir.display());
    println!("Compacted {} ({} keys)", data_dir.display(), storage.len());
    Ok(())
}

fn repair(data_dir: &Path, options: &StorageOptions) -> Result<()> {
    let stats = DiskStorage::repair(data_dir, options)
        .with_context(|| format!("Failed to repair {}", data_dir.display()))?;

    println!("Repaired {}", data_dir.display());
    println!("  snapshot loaded:     {}", stats.snapshot_loaded);
    println!("  snapshot entries:    {}", stats.snapshot_entries);
    println!("  WAL records kept:    {}", stats.wal_entries_replayed);
    println!("  damaged records:     {}", stats.corrupted_entries);
    println!("  took:                {:?}", stats.recovery_duration);
    Ok(())
}

/// Initialize logging based on log level
fn init_logging(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .ok(); // Ignore error if already initialized

    Ok(())
}
