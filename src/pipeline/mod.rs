//! Pipeline orchestrator: ties sources → filter → history → scoring → log.
//!
//! ## Stages
//!
//! 1. `refresh_snapshot` — pull the full listing into the raw sheet
//! 2. `filter_universe` — raw sheet → quant target sheet
//! 3. `refresh_history` — target sheet → price history sheet
//! 4. `recommend` — price history → scored picks appended to the log
//!
//! `run_daily` runs all four in order. Stages talk to each other only through
//! the store, so any single stage can be re-run on its own.

use crate::config::AppConfig;
use crate::history::{HistoryAccumulator, RefreshMode, RefreshStats};
use crate::llm::TextGenerator;
use crate::models::{PricePoint, Recommendation, SymbolRecord, UniverseEntry};
use crate::recommend::RecommendationSelector;
use crate::scoring;
use crate::source::{MarketSnapshotSource, PriceHistorySource};
use crate::storage::{TabularStore, read_records, write_records};
use crate::universe::UniverseFilter;
use crate::utils::Timer;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::time::Duration;
use tracing::{info, warn};

pub struct Pipeline<'a> {
    config: &'a AppConfig,
    store: &'a dyn TabularStore,
    snapshot: &'a dyn MarketSnapshotSource,
    history: &'a dyn PriceHistorySource,
    generator: Option<&'a dyn TextGenerator>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a AppConfig,
        store: &'a dyn TabularStore,
        snapshot: &'a dyn MarketSnapshotSource,
        history: &'a dyn PriceHistorySource,
    ) -> Self {
        Self {
            config,
            store,
            snapshot,
            history,
            generator: None,
        }
    }

    pub fn with_generator(mut self, generator: &'a dyn TextGenerator) -> Self {
        self.generator = Some(generator);
        self
    }

    pub async fn run_daily(&self, mode: RefreshMode, today: NaiveDate) -> Result<PipelineStats> {
        let symbols_listed = self.refresh_snapshot().await?;
        let universe = self.filter_universe()?;
        let history = self.refresh_history(mode, today).await?;
        let picks = self.recommend(today).await?;

        let stats = PipelineStats {
            symbols_listed,
            universe_size: universe.len(),
            history,
            recommendations: picks.len(),
        };

        info!(
            "=== Done: {} listed | {} in universe | {} history rows written ({} fetch errors) | {} picks ===",
            stats.symbols_listed,
            stats.universe_size,
            stats.history.rows_written,
            stats.history.fetch_errors,
            stats.recommendations,
        );
        Ok(stats)
    }

    // ── 1. Snapshot ──────────────────────────────────────────────────────────

    pub async fn refresh_snapshot(&self) -> Result<usize> {
        let _t = Timer::start("Snapshot refresh");
        let sheet = &self.config.storage.sheets.raw_universe;
        let market = &self.config.source.listing_market;

        let symbols = self
            .snapshot
            .list_symbols(market)
            .await
            .with_context(|| format!("Listing fetch failed ({})", market))?;

        if symbols.is_empty() {
            warn!("Snapshot: source returned no symbols, keeping sheet {}", sheet);
            return Ok(0);
        }

        self.store.clear(sheet)?;
        write_records(self.store, sheet, &symbols)
            .with_context(|| format!("Failed to write sheet {}", sheet))?;

        info!("Snapshot: {} symbols saved to {}", symbols.len(), sheet);
        Ok(symbols.len())
    }

    // ── 2. Universe ──────────────────────────────────────────────────────────

    pub fn filter_universe(&self) -> Result<Vec<UniverseEntry>> {
        let _t = Timer::start("Universe filter");
        let sheets = &self.config.storage.sheets;

        let symbols: Vec<SymbolRecord> = read_records(self.store, &sheets.raw_universe)
            .with_context(|| format!("Failed to read sheet {}", sheets.raw_universe))?;
        if symbols.is_empty() {
            warn!("Universe: sheet {} is empty; run the snapshot job first", sheets.raw_universe);
            return Ok(vec![]);
        }

        let universe = UniverseFilter::new(&self.config.universe)?.apply(&symbols);

        self.store.clear(&sheets.targets)?;
        if !universe.is_empty() {
            write_records(self.store, &sheets.targets, &universe)
                .with_context(|| format!("Failed to write sheet {}", sheets.targets))?;
            info!("Universe: {} symbols saved to {}", universe.len(), sheets.targets);
        }
        Ok(universe)
    }

    // ── 3. History ───────────────────────────────────────────────────────────

    pub async fn refresh_history(&self, mode: RefreshMode, today: NaiveDate) -> Result<RefreshStats> {
        let _t = Timer::start("History refresh");
        let sheets = &self.config.storage.sheets;

        let universe: Vec<UniverseEntry> = read_records(self.store, &sheets.targets)
            .with_context(|| format!("Failed to read sheet {}", sheets.targets))?;

        HistoryAccumulator::new(self.history, self.store, &sheets.history, &self.config.history)
            .refresh(&universe, mode, today)
            .await
    }

    // ── 4. Recommend ─────────────────────────────────────────────────────────

    pub async fn recommend(&self, today: NaiveDate) -> Result<Vec<Recommendation>> {
        let _t = Timer::start("Recommendation");
        let sheets = &self.config.storage.sheets;

        let history: Vec<PricePoint> = read_records(self.store, &sheets.history)
            .with_context(|| format!("Failed to read sheet {}", sheets.history))?;
        let scored = scoring::score(&history);

        let mut selector = RecommendationSelector::new(self.store, &sheets.recommendations);
        if let Some(generator) = self.generator {
            selector = selector.with_narrative(generator, Duration::from_millis(self.config.narrative.delay_ms));
        }

        selector.select(scored, self.config.recommend.top_k, today).await
    }
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub symbols_listed: usize,
    pub universe_size: usize,
    pub history: RefreshStats,
    pub recommendations: usize,
}
