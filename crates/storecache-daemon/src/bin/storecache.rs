//! Store cache maintenance tool
//!
//! Usage:
//!   storecache stats [--dir <cache_dir>] [--max-bytes N] [--json]
//!   storecache trim --target-bytes N [--dir <cache_dir>]
//!   storecache clear [--dir <cache_dir>]
//!   storecache config
//!
//! Opening a cache directory runs the same startup reconciliation as the
//! server: orphaned files are removed and an over-budget cache is trimmed.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use storecache_core::{CacheConfig, Config};
use storecache_daemon::StoreCache;

#[derive(Parser)]
#[command(name = "storecache")]
#[command(about = "Inspect and maintain a store cache directory")]
struct Cli {
    /// Configuration file (defaults to the platform config path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report what is cached
    Stats {
        /// Cache directory (the parent of the `storecache` directory)
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Byte budget to open the cache with
        #[arg(long)]
        max_bytes: Option<u64>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Evict least recently used blobs down to a size
    Trim {
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Bytes to keep
        #[arg(long)]
        target_bytes: u64,
    },
    /// Remove every cached blob
    Clear {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Print a sample configuration file
    Config,
}

#[derive(Serialize)]
struct StatsReport {
    root: PathBuf,
    entries: usize,
    current_bytes: u64,
    max_bytes: u64,
    usage_percent: u32,
    oldest: Option<String>,
    newest: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };

    match cli.command {
        Command::Stats {
            dir,
            max_bytes,
            json,
        } => {
            let cache = open(&config.cache, dir, max_bytes)?;
            let usage = cache.usage();
            let entries = cache.entries();
            let report = StatsReport {
                root: cache.root().to_path_buf(),
                entries: usage.entry_count,
                current_bytes: usage.current_bytes,
                max_bytes: usage.max_bytes,
                usage_percent: usage.usage_percent,
                oldest: entries.first().map(|e| e.reference.to_string()),
                newest: entries.last().map(|e| e.reference.to_string()),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Cache:    {}", report.root.display());
                println!("Entries:  {}", report.entries);
                println!(
                    "Usage:    {} / {} bytes ({}%)",
                    report.current_bytes, report.max_bytes, report.usage_percent
                );
                if let Some(oldest) = &report.oldest {
                    println!("Oldest:   {}", oldest);
                }
                if let Some(newest) = &report.newest {
                    println!("Newest:   {}", newest);
                }
            }
        }
        Command::Trim { dir, target_bytes } => {
            let cache = open(&config.cache, dir, None)?;
            let report = cache.trim(target_bytes);
            info!(
                "Evicted {} entries ({} bytes), {} bytes remain",
                report.count(),
                report.freed_bytes,
                cache.total_bytes()
            );
        }
        Command::Clear { dir } => {
            let cache = open(&config.cache, dir, None)?;
            let report = cache.clear();
            info!(
                "Removed {} entries ({} bytes)",
                report.count(),
                report.freed_bytes
            );
        }
        Command::Config => {
            print!("{}", Config::sample());
        }
    }

    Ok(())
}

/// Open the cache with command-line overrides applied to the configuration
fn open(
    base: &CacheConfig,
    dir: Option<PathBuf>,
    max_bytes: Option<u64>,
) -> Result<StoreCache, storecache_core::StoreError> {
    let mut config = base.clone();
    if dir.is_some() {
        config.cache_dir = dir;
    }
    if let Some(max_bytes) = max_bytes {
        config.max_bytes = max_bytes;
    }
    StoreCache::from_config(&config)
}
