mod config;
mod error;
mod history;
mod llm;
mod loader;
mod models;
mod pipeline;
mod recommend;
mod scoring;
mod source;
mod storage;
mod universe;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;
use crate::history::RefreshMode;
use crate::llm::GeminiGenerator;
use crate::loader::FileSnapshotSource;
use crate::models::PricePoint;
use crate::pipeline::Pipeline;
use crate::source::{KrxSnapshotSource, MarketSnapshotSource, NaverHistorySource};
use crate::storage::database::DuckDbStore;
use crate::storage::{TabularStore, read_records};

#[derive(Parser)]
#[command(name = "krx-quant", about = "KRX universe screener and daily recommender", version)]
struct Cli {
    /// Stage to run
    #[arg(value_enum, default_value_t = Job::All)]
    job: Job,

    /// Replace the price history instead of appending the latest days
    #[arg(long, env = "KQUANT_FULL_REFRESH")]
    full_refresh: bool,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Job {
    /// Snapshot → universe → history → recommend
    All,
    /// Pull the full market listing into the raw sheet
    Snapshot,
    /// Filter the raw sheet into the quant target sheet
    Universe,
    /// Accumulate daily bars for the target sheet
    History,
    /// Score the history and append today's picks to the log
    Recommend,
    /// Print row counts per sheet
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "krx_quant=info,warn",
        1 => "krx_quant=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = AppConfig::load()?;
    let location = config
        .storage
        .location
        .as_deref()
        .context("storage.location is not set")?;
    let store = DuckDbStore::open(location)?;

    if cli.job == Job::Stats {
        return print_stats(&config, &store);
    }

    let snapshot: Box<dyn MarketSnapshotSource> = match &config.source.snapshot_csv {
        Some(path) => {
            info!("Snapshot source: {:?}", path);
            Box::new(FileSnapshotSource::new(path.clone()))
        }
        None => Box::new(KrxSnapshotSource::new(&config.source)?),
    };
    let history = NaverHistorySource::new(&config.source)?;
    let generator = if config.narrative.enabled {
        Some(GeminiGenerator::new(&config.narrative)?)
    } else {
        None
    };

    let mut pipeline = Pipeline::new(&config, &store, snapshot.as_ref(), &history);
    if let Some(g) = &generator {
        pipeline = pipeline.with_generator(g);
    }

    let mode = if cli.full_refresh {
        RefreshMode::Full
    } else {
        RefreshMode::Incremental
    };
    let today = chrono::Local::now().date_naive();

    match cli.job {
        Job::All => {
            let _t = utils::Timer::start(format!("Daily cycle {}", today));
            pipeline.run_daily(mode, today).await?;
        }
        Job::Snapshot => {
            pipeline.refresh_snapshot().await?;
        }
        Job::Universe => {
            pipeline.filter_universe()?;
        }
        Job::History => {
            let stats = pipeline.refresh_history(mode, today).await?;
            info!(
                "Done: {} of {} symbols fetched, {} rows written, {} errors",
                stats.symbols_fetched, stats.symbols_requested, stats.rows_written, stats.fetch_errors
            );
        }
        Job::Recommend => {
            pipeline.recommend(today).await?;
        }
        Job::Stats => {}
    }

    Ok(())
}

fn print_stats(config: &AppConfig, store: &dyn TabularStore) -> Result<()> {
    let sheets = &config.storage.sheets;
    let history: Vec<PricePoint> = read_records(store, &sheets.history)?;
    let first = history.iter().map(|p| p.date).min();
    let last = history.iter().map(|p| p.date).max();

    println!("─────────────────────────────────");
    println!("  KRX Quant — Store Stats");
    println!("─────────────────────────────────");
    println!("  Listing  : {}", utils::fmt_count(store.row_count(&sheets.raw_universe)?));
    println!("  Targets  : {}", utils::fmt_count(store.row_count(&sheets.targets)?));
    println!("  History  : {}", utils::fmt_count(history.len()));
    println!("  Picks    : {}", utils::fmt_count(store.row_count(&sheets.recommendations)?));
    println!("  From     : {}", first.map(|d| d.to_string()).unwrap_or("—".into()));
    println!("  To       : {}", last.map(|d| d.to_string()).unwrap_or("—".into()));
    println!("─────────────────────────────────");
    Ok(())
}
