//! voxctl - inspect and reset a response cache directory

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use voxcache::CacheConfig;
use voxstore::{AudioStore, CacheEntry};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cache directory (overrides the config file)
    #[arg(short, long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Size cap in MiB (overrides the config file)
    #[arg(long, value_name = "MB")]
    max_mb: Option<u64>,

    /// JSON cache configuration
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show entry count and capacity use
    Stats {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List entries, least recently used first
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Reload the directory, dropping broken entries and stray files
    Verify,

    /// Delete every stored entry
    Clear,
}

#[derive(Debug, Serialize)]
struct StoreStats {
    path: PathBuf,
    entries: usize,
    bytes: u64,
    max_bytes: u64,
    usage_percent: f64,
}

#[derive(Debug, Serialize)]
struct EntryRow {
    text: String,
    voice: String,
    speed: f64,
    provider: String,
    size: u64,
    hit_count: u64,
    created_at: String,
    last_used_at: String,
    locator: String,
}

impl From<&CacheEntry> for EntryRow {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            text: entry.key.text().to_string(),
            voice: entry.key.voice().to_string(),
            speed: entry.key.speed(),
            provider: entry.key.provider().to_string(),
            size: entry.size,
            hit_count: entry.hit_count,
            created_at: format_stamp(entry.created_at),
            last_used_at: format_stamp(entry.last_used_at),
            locator: entry.locator.clone(),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = resolve_config(&args)?;
    let policy = config.validate().context("Invalid cache configuration")?;

    match args.command {
        Commands::Stats { json } => {
            let store = open_store(&config, policy)?;
            let stats = store_stats(&store);
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Cache directory: {}", stats.path.display());
                println!("Entries:         {}", stats.entries);
                println!(
                    "Size:            {} / {} ({:.1}%)",
                    format_bytes(stats.bytes),
                    format_bytes(stats.max_bytes),
                    stats.usage_percent
                );
            }
        }

        Commands::List { json } => {
            let store = open_store(&config, policy)?;
            let rows: Vec<EntryRow> = store.entries().iter().map(EntryRow::from).collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for row in &rows {
                    println!(
                        "{}  {:>10}  {:>5} hits  {}/{}@{:.2}  {:?}",
                        row.last_used_at,
                        format_bytes(row.size),
                        row.hit_count,
                        row.provider,
                        row.voice,
                        row.speed,
                        row.text
                    );
                }
                println!("{} entries", rows.len());
            }
        }

        Commands::Verify => {
            let (store, report) = AudioStore::open_with_report(&config.cache_dir, policy)
                .with_context(|| format!("Failed to open cache at {:?}", config.cache_dir))?;
            println!("Kept:            {}", report.loaded);
            println!("Dropped:         {}", report.dropped);
            println!("Orphans removed: {}", report.orphans_removed);
            println!("Evicted:         {}", report.evicted);
            println!("Size:            {}", format_bytes(store.total_bytes()));
        }

        Commands::Clear => {
            let store = open_store(&config, policy)?;
            let removed = store.clear().context("Failed to clear cache")?;
            info!(entries = removed, "cache cleared");
            println!("Removed {} entries", removed);
        }
    }

    Ok(())
}

fn resolve_config(args: &Args) -> Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => CacheConfig::default(),
    };
    if let Some(dir) = &args.dir {
        config.cache_dir = dir.clone();
    }
    if let Some(mb) = args.max_mb {
        config.max_bytes = mb.saturating_mul(1024 * 1024);
    }
    Ok(config)
}

fn load_config(path: &Path) -> Result<CacheConfig> {
    let text = fs::read_to_string(path).context(format!("Failed to read config: {:?}", path))?;
    serde_json::from_str(&text).context(format!("Failed to parse config: {:?}", path))
}

fn open_store(config: &CacheConfig, policy: voxstore::EvictionPolicy) -> Result<AudioStore> {
    AudioStore::open(&config.cache_dir, policy)
        .with_context(|| format!("Failed to open cache at {:?}", config.cache_dir))
}

fn store_stats(store: &AudioStore) -> StoreStats {
    let bytes = store.total_bytes();
    let max_bytes = store.policy().max_bytes();
    StoreStats {
        path: store.path().to_path_buf(),
        entries: store.len(),
        bytes,
        max_bytes,
        usage_percent: (bytes as f64 / max_bytes as f64 * 1000.0).round() / 10.0,
    }
}

/// Render a microsecond UNIX stamp as UTC
fn format_stamp(micros: u64) -> String {
    i64::try_from(micros)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_micros)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| micros.to_string())
}

fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    let b = bytes as f64;
    if b >= MIB {
        format!("{:.1} MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{} B", bytes)
    }
}
