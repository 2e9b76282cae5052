//! Harvest CLI
//!
//! Local maintenance and query entry point for a harvest cache directory.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use harvest::{
    config::{check_config_file, load_config},
    error::Result,
    models::{EntryKey, GetOptions, SearchOptions, SortOrder},
    search::SearchOrchestrator,
    storage::CacheStore,
};
use serde::Serialize;

/// harvest - scraped page cache and job opportunity search
#[derive(Parser, Debug)]
#[command(name = "harvest", version, about = "Harvest cache and opportunity search")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "harvest.toml")]
    config: PathBuf,

    /// Override the configured cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Sort {
    Relevance,
    Recent,
}

impl From<Sort> for SortOrder {
    fn from(sort: Sort) -> Self {
        match sort {
            Sort::Relevance => SortOrder::Relevance,
            Sort::Recent => SortOrder::Recent,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the opportunity index and print its stats
    Index,

    /// Search opportunities by job title
    Search {
        title: String,

        /// Two-letter language code
        #[arg(long)]
        language: Option<String>,

        /// Restrict to a domain (repeatable)
        #[arg(long = "domain")]
        domains: Vec<String>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Cursor from a previous page
        #[arg(long)]
        cursor: Option<String>,

        /// Minimum fuzzy overlap in [0, 1]
        #[arg(long)]
        threshold: Option<f64>,

        #[arg(long, value_enum, default_value_t = Sort::Relevance)]
        sort: Sort,

        /// Use the in-memory index instead of scanning files
        #[arg(long)]
        indexed: bool,
    },

    /// Read one entry by URL or key
    Get {
        key: String,

        /// Return expired entries marked stale
        #[arg(long)]
        allow_stale: bool,
    },

    /// Report entries with missing or malformed fields
    Check,

    /// Fix or delete malformed entries
    Repair,

    /// Delete entries past their retention or TTL
    Sweep,

    /// Print cache counters
    Stats,

    /// Validate the configuration file
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = load_config(&cli.config)?;
    if let Some(dir) = cli.cache_dir {
        config.cache.dir = dir;
    }
    log::debug!("Cache directory: {}", config.cache.dir.display());

    let store = Arc::new(CacheStore::new(config.cache.clone()));

    match cli.command {
        Command::Index => {
            let orchestrator = SearchOrchestrator::new(&config, store.clone());
            let stats = orchestrator.rebuild_index().await?;
            log::info!(
                "Indexed {} opportunities from {} files in {}ms",
                stats.opportunities,
                stats.files,
                stats.last_build_ms
            );
            print_json(&stats)?;
        }

        Command::Search {
            title,
            language,
            domains,
            limit,
            offset,
            cursor,
            threshold,
            sort,
            indexed,
        } => {
            let orchestrator = SearchOrchestrator::new(&config, store.clone());
            if indexed {
                orchestrator.rebuild_index().await?;
            }
            let opts = SearchOptions {
                language,
                domains,
                limit,
                offset,
                cursor,
                fuzzy_threshold: threshold,
                sort: sort.into(),
                target_results: None,
            };
            let response = orchestrator.search(&title, &opts).await;
            print_json(&response)?;
        }

        Command::Get { key, allow_stale } => {
            let key = EntryKey::parse(&key);
            let opts = GetOptions {
                allow_stale,
                ..GetOptions::default()
            };
            match store.get(&key, opts).await {
                Some(page) => print_json(&page)?,
                None => log::warn!("No usable entry for {}", key),
            }
        }

        Command::Check => {
            let report = store.validate_consistency().await;
            log::info!(
                "{}/{} entries healthy ({:.1}%)",
                report.healthy,
                report.total,
                report.health_percent
            );
            print_json(&report)?;
        }

        Command::Repair => {
            let report = store.repair().await;
            log::info!(
                "Scanned {}, repaired {}, deleted {}",
                report.scanned,
                report.repaired,
                report.deleted
            );
            print_json(&report)?;
        }

        Command::Sweep => {
            let report = store.sweep_expired().await;
            log::info!("Swept {} of {} entries", report.deleted, report.scanned);
            print_json(&report)?;
        }

        Command::Stats => {
            let files = store.list_files().await;
            log::info!("{} entries in {}", files.len(), store.root_dir().display());
            print_json(&store.metrics())?;
        }

        Command::Validate => {
            if let Err(e) = check_config_file(&cli.config) {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("Config OK: {}", cli.config.display());
        }
    }

    let flushed = store.flush_events().await;
    if flushed.failed > 0 || flushed.dropped > 0 {
        log::warn!(
            "Profiler events: {} delivered, {} failed, {} dropped",
            flushed.delivered,
            flushed.failed,
            flushed.dropped
        );
    }

    Ok(())
}
