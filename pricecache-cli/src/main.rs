//! PriceCache CLI — fetch, export, and cache management commands.
//!
//! Commands:
//! - `fetch` — reconcile symbols against the cache, fetching only missing ranges
//! - `cache status` — list cached entries, including corrupt ones
//! - `cache clear` — remove every cached entry

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use pricecache_core::domain::Interval;
use pricecache_core::reconcile::{BatchProgress, BatchReport, Reconciler, ReconcilerOptions, SymbolOutcome};
use pricecache_core::source::csv_file::export_series;
use pricecache_core::source::{CircuitBreaker, CsvSource, PriceSource, SyntheticSource, YahooSource};
use pricecache_core::store::{CacheStore, EntrySummary};
use pricecache_core::PriceCacheConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pricecache",
    about = "PriceCache CLI — daily price series with a range-aware local cache"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory (overrides the config file).
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch series for one or more symbols, using the cache where possible.
    Fetch {
        /// Symbols to fetch (e.g., SPY QQQ AAPL).
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Field to fetch: Open, High, Low, Close, Adj Close, Volume.
        #[arg(long, default_value = "Close")]
        field: String,

        /// Start date (YYYY-MM-DD). Defaults to one year ago.
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<String>,

        /// Where data comes from on a cache miss.
        #[arg(long, value_enum, default_value_t = SourceKind::Yahoo)]
        source: SourceKind,

        /// Directory of `{SYMBOL}.csv` files (with `--source csv`).
        #[arg(long)]
        csv_dir: Option<PathBuf>,

        /// Write each series to `{SYMBOL}_{field}.csv` in this directory.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached entries with their ranges and point counts.
    Status,
    /// Remove all cached entries.
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceKind {
    Yahoo,
    Synthetic,
    Csv,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => PriceCacheConfig::from_file(path)?,
        None => PriceCacheConfig::default(),
    };
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }
    tracing::debug!(cache_dir = %config.cache_dir.display(), "configuration loaded");

    match cli.command {
        Commands::Fetch {
            symbols,
            field,
            start,
            end,
            source,
            csv_dir,
            out,
        } => run_fetch(&config, symbols, &field, start, end, source, csv_dir, out),
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&config.cache_dir),
            CacheAction::Clear => run_cache_clear(&config.cache_dir),
        },
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn parse_date(raw: Option<&str>, default: NaiveDate) -> Result<NaiveDate> {
    raw.map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}'")))
        .transpose()
        .map(|d| d.unwrap_or(default))
}

fn build_source(
    kind: SourceKind,
    config: &PriceCacheConfig,
    csv_dir: Option<PathBuf>,
) -> Result<Arc<dyn PriceSource>> {
    let source: Arc<dyn PriceSource> = match kind {
        SourceKind::Yahoo => {
            let breaker = Arc::new(CircuitBreaker::new(config.yahoo.breaker_cooldown()));
            Arc::new(YahooSource::new(&config.yahoo, breaker)?)
        }
        SourceKind::Synthetic => Arc::new(SyntheticSource::new()),
        SourceKind::Csv => {
            let Some(dir) = csv_dir else {
                bail!("--source csv requires --csv-dir");
            };
            Arc::new(CsvSource::new(dir))
        }
    };
    tracing::debug!(source = source.name(), "price source ready");
    Ok(source)
}

/// Prints one line per symbol as the batch progresses.
struct StdoutProgress;

impl BatchProgress for StdoutProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        println!("[{}/{}] {symbol}...", index + 1, total);
    }

    fn on_complete(&self, symbol: &str, _index: usize, _total: usize, outcome: &SymbolOutcome) {
        match outcome {
            SymbolOutcome::Found(series) => {
                let span = series
                    .observed_span()
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                println!("  OK: {symbol} {} points {span}", series.len());
            }
            SymbolOutcome::NotFound => println!("  NO DATA: {symbol}"),
            SymbolOutcome::Failed(e) => println!("  FAIL: {symbol}: {e}"),
        }
    }

    fn on_batch_complete(&self, report: &BatchReport) {
        println!(
            "\nFetch complete: {} found, {} without data, {} failed",
            report.found_count(),
            report.not_found_count(),
            report.failed_count()
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn run_fetch(
    config: &PriceCacheConfig,
    symbols: Vec<String>,
    field: &str,
    start: Option<String>,
    end: Option<String>,
    source: SourceKind,
    csv_dir: Option<PathBuf>,
    out: Option<PathBuf>,
) -> Result<()> {
    let today = chrono::Local::now().date_naive();
    let start_date = parse_date(start.as_deref(), today - chrono::Duration::days(365))?;
    let end_date = parse_date(end.as_deref(), today)?;
    let requested = Interval::new(start_date, end_date)?;

    let store = CacheStore::open(&config.cache_dir)
        .with_context(|| format!("cannot open cache at {}", config.cache_dir.display()))?;
    let reconciler = Reconciler::new(Arc::new(store), build_source(source, config, csv_dir)?)
        .with_options(ReconcilerOptions::from(config));

    let report = reconciler.fetch_many_with_progress(&symbols, field, requested, &StdoutProgress);

    if let Some(dir) = out {
        for series in report.series().values() {
            let path = export_series(series, &dir)
                .with_context(|| format!("cannot export {} to {}", series.symbol(), dir.display()))?;
            println!("Wrote {}", path.display());
        }
    }

    if !report.all_succeeded() {
        for (symbol, err) in report.failures() {
            eprintln!("Error for {symbol}: {err}");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn run_cache_status(cache_dir: &Path) -> Result<()> {
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }

    let store = CacheStore::open(cache_dir)?;
    let entries = store.entries()?;

    println!("Cache: {}", store.describe());
    println!("Entries: {}", entries.len());
    println!();
    println!(
        "{:<10} {:<10} {:<26} {:>7}  {}",
        "Symbol", "Field", "Interval", "Points", "Fetched"
    );
    println!("{}", "-".repeat(78));
    let mut corrupt = 0;
    for entry in &entries {
        match entry {
            EntrySummary::Valid {
                id,
                point_count,
                fetched_at,
                ..
            } => println!(
                "{:<10} {:<10} {:<26} {:>7}  {}",
                id.key.symbol(),
                id.key.field(),
                id.interval.to_string(),
                point_count,
                fetched_at.format("%Y-%m-%d %H:%M")
            ),
            EntrySummary::Corrupt { storage_id, reason } => {
                corrupt += 1;
                println!("CORRUPT    {storage_id}: {reason}");
            }
        }
    }
    if corrupt > 0 {
        println!();
        println!("{corrupt} corrupt entr{} (ignored by lookups; `cache clear` removes them)", if corrupt == 1 { "y" } else { "ies" });
    }

    Ok(())
}

fn run_cache_clear(cache_dir: &Path) -> Result<()> {
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }

    let store = CacheStore::open(cache_dir)?;
    let report = store.clear()?;

    println!("Removed {} entr{}.", report.removed, if report.removed == 1 { "y" } else { "ies" });
    if !report.is_complete() {
        for (id, err) in &report.failures {
            eprintln!("Could not remove {id}: {err}");
        }
        bail!("{} entries could not be removed", report.failures.len());
    }

    Ok(())
}
