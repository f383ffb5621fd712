//! Price-history accumulation for the universe.
//!
//! ## Refresh modes
//!
//! `Full` — fetch a year of bars for every universe entry and replace the
//!   history sheet wholesale.
//!
//! `Incremental` — daily cron mode. Skips entirely when the sheet already
//!   holds a row dated today or later; otherwise fetches a short window
//!   (bridging weekends/holidays) and appends only `(date, code)` keys the
//!   sheet does not have yet.
//!
//! Duplicate keys inside one fetch batch are resolved "last fetched wins".

use crate::config::HistoryConfig;
use crate::models::{PricePoint, UniverseEntry};
use crate::source::PriceHistorySource;
use crate::storage::{TabularStore, append_records, read_records, write_records};
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use std::collections::HashSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    Full,
    Incremental,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshStats {
    pub symbols_requested: usize,
    pub symbols_fetched: usize,
    pub fetch_errors: usize,
    pub rows_fetched: usize,
    pub rows_written: usize,
    /// Set when the incremental same-day guard short-circuited the run.
    pub skipped: bool,
}

pub struct HistoryAccumulator<'a> {
    source: &'a dyn PriceHistorySource,
    store: &'a dyn TabularStore,
    sheet: &'a str,
    config: &'a HistoryConfig,
}

impl<'a> HistoryAccumulator<'a> {
    pub fn new(
        source: &'a dyn PriceHistorySource,
        store: &'a dyn TabularStore,
        sheet: &'a str,
        config: &'a HistoryConfig,
    ) -> Self {
        Self { source, store, sheet, config }
    }

    pub async fn refresh(&self, universe: &[UniverseEntry], mode: RefreshMode, today: NaiveDate) -> Result<RefreshStats> {
        if universe.is_empty() {
            warn!("History refresh: empty universe, nothing to fetch");
            return Ok(RefreshStats::default());
        }

        match mode {
            RefreshMode::Full => self.refresh_full(universe, today).await,
            RefreshMode::Incremental => self.refresh_incremental(universe, today).await,
        }
    }

    async fn refresh_full(&self, universe: &[UniverseEntry], today: NaiveDate) -> Result<RefreshStats> {
        let start = today - Duration::days(self.config.full_window_days);
        info!("History refresh (full): {} symbols, {} → {}", universe.len(), start, today);

        let (points, mut stats) = self.fetch_batch(universe, start, today).await;
        if points.is_empty() {
            warn!("History refresh (full): no rows fetched, keeping existing sheet");
            return Ok(stats);
        }

        write_records(self.store, self.sheet, &points)
            .with_context(|| format!("Failed to replace history sheet {}", self.sheet))?;
        stats.rows_written = points.len();

        info!("History refresh (full): {} rows written", stats.rows_written);
        Ok(stats)
    }

    async fn refresh_incremental(&self, universe: &[UniverseEntry], today: NaiveDate) -> Result<RefreshStats> {
        let existing: Vec<PricePoint> = read_records(self.store, self.sheet)
            .with_context(|| format!("Failed to read history sheet {}", self.sheet))?;

        let Some(latest) = existing.iter().map(|p| p.date).max() else {
            if self.config.bootstrap_full_when_empty {
                info!("History refresh: sheet is empty, bootstrapping with a full refresh");
                return self.refresh_full(universe, today).await;
            }
            warn!("History refresh: sheet is empty, fetching only the incremental window");
            return self.append_window(universe, today, HashSet::new()).await;
        };

        if latest >= today {
            info!("History refresh: already updated (latest {}), skipping", latest);
            return Ok(RefreshStats {
                skipped: true,
                ..RefreshStats::default()
            });
        }

        let stored: HashSet<(NaiveDate, String)> =
            existing.into_iter().map(|p| (p.date, p.code)).collect();
        self.append_window(universe, today, stored).await
    }

    async fn append_window(
        &self,
        universe: &[UniverseEntry],
        today: NaiveDate,
        stored: HashSet<(NaiveDate, String)>,
    ) -> Result<RefreshStats> {
        let start = today - Duration::days(self.config.incremental_window_days);
        info!("History refresh (incremental): {} symbols, {} → {}", universe.len(), start, today);

        let (points, mut stats) = self.fetch_batch(universe, start, today).await;
        let fresh: Vec<PricePoint> = points
            .into_iter()
            .filter(|p| !stored.contains(&(p.date, p.code.clone())))
            .collect();

        if fresh.is_empty() {
            info!("History refresh (incremental): nothing new to append");
            return Ok(stats);
        }

        append_records(self.store, self.sheet, &fresh)
            .with_context(|| format!("Failed to append to history sheet {}", self.sheet))?;
        stats.rows_written = fresh.len();

        info!("History refresh (incremental): {} rows appended", stats.rows_written);
        Ok(stats)
    }

    /// Fetch every entry one after another. Per-symbol failures are logged and
    /// skipped; the batch is deduplicated before it is returned.
    async fn fetch_batch(&self, universe: &[UniverseEntry], start: NaiveDate, end: NaiveDate) -> (Vec<PricePoint>, RefreshStats) {
        let mut stats = RefreshStats {
            symbols_requested: universe.len(),
            ..RefreshStats::default()
        };
        let mut points = Vec::new();

        for entry in universe {
            match self.source.fetch_series(&entry.code, start, end).await {
                Ok(bars) if bars.is_empty() => {
                    debug!("{} ({}): no bars", entry.code, entry.name);
                }
                Ok(bars) => {
                    stats.symbols_fetched += 1;
                    points.extend(bars.into_iter().map(|b| PricePoint::stamp(b, entry)));
                }
                Err(e) => {
                    warn!("{} ({}): fetch failed, skipping: {:#}", entry.code, entry.name, e);
                    stats.fetch_errors += 1;
                }
            }
        }

        stats.rows_fetched = points.len();
        let points = dedup_last_wins(points);
        if points.len() < stats.rows_fetched {
            debug!("Dropped {} duplicate rows from batch", stats.rows_fetched - points.len());
        }
        (points, stats)
    }
}

/// Keep one row per `(date, code)`: the last one in `points`, at the position
/// of that last occurrence.
pub fn dedup_last_wins(points: Vec<PricePoint>) -> Vec<PricePoint> {
    let mut seen: HashSet<(NaiveDate, String)> = HashSet::with_capacity(points.len());
    let mut kept: Vec<PricePoint> = points
        .into_iter()
        .rev()
        .filter(|p| seen.insert((p.date, p.code.clone())))
        .collect();
    kept.reverse();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DailyBar, Market};
    use crate::storage::memory::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn bar(d: u32, close: f64) -> DailyBar {
        DailyBar {
            date: day(d),
            open: close,
            high: close + 5.0,
            low: close - 5.0,
            close,
            volume: 100_000,
        }
    }

    fn entry(code: &str, cap: f64) -> UniverseEntry {
        UniverseEntry {
            code: code.to_string(),
            name: format!("name-{}", code),
            market: Market::PrimaryBoard,
            market_cap: cap,
            volume: 100_000,
            traded_value: 1e9,
        }
    }

    /// Serves canned bars per code, filtered to the requested window.
    #[derive(Default)]
    struct FakeSource {
        bars: HashMap<String, Vec<DailyBar>>,
        failing: HashSet<String>,
        calls: Mutex<Vec<(String, NaiveDate, NaiveDate)>>,
    }

    #[async_trait]
    impl PriceHistorySource for FakeSource {
        async fn fetch_series(&self, code: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyBar>> {
            self.calls.lock().unwrap().push((code.to_string(), start, end));
            if self.failing.contains(code) {
                anyhow::bail!("upstream 500");
            }
            Ok(self
                .bars
                .get(code)
                .map(|b| b.iter().filter(|b| b.date >= start && b.date <= end).cloned().collect())
                .unwrap_or_default())
        }
    }

    fn stored(store: &MemoryStore) -> Vec<PricePoint> {
        read_records(store, "history").unwrap()
    }

    fn assert_unique_keys(points: &[PricePoint]) {
        let keys: HashSet<_> = points.iter().map(|p| (p.date, p.code.clone())).collect();
        assert_eq!(keys.len(), points.len());
    }

    #[tokio::test]
    async fn full_refresh_replaces_and_stamps() {
        let mut source = FakeSource::default();
        source.bars.insert("000001".into(), vec![bar(3, 100.0), bar(4, 101.0)]);
        source.bars.insert("000002".into(), vec![bar(4, 50.0)]);
        let store = MemoryStore::default();
        write_records(&store, "history", &[PricePoint::stamp(bar(1, 10.0), &entry("999999", 1.0))]).unwrap();

        let cfg = HistoryConfig::default();
        let acc = HistoryAccumulator::new(&source, &store, "history", &cfg);
        let universe = vec![entry("000001", 7e11), entry("000002", 3e11)];
        let stats = acc.refresh(&universe, RefreshMode::Full, day(5)).await.unwrap();

        assert_eq!(stats.rows_written, 3);
        assert_eq!(stats.symbols_fetched, 2);
        let points = stored(&store);
        assert_eq!(points.len(), 3);
        assert!(points.iter().all(|p| p.code != "999999"));
        assert_eq!(points[0].market_cap, 7e11);
        assert_eq!(points[2].name, "name-000002");

        let calls = source.calls.lock().unwrap();
        assert_eq!(calls[0].1, day(5) - Duration::days(365));
    }

    #[tokio::test]
    async fn fetch_failures_are_skipped() {
        let mut source = FakeSource::default();
        source.bars.insert("000001".into(), vec![bar(4, 100.0)]);
        source.failing.insert("000002".into());
        let store = MemoryStore::default();
        let cfg = HistoryConfig::default();
        let acc = HistoryAccumulator::new(&source, &store, "history", &cfg);

        let universe = vec![entry("000002", 1.0), entry("000003", 1.0), entry("000001", 1.0)];
        let stats = acc.refresh(&universe, RefreshMode::Full, day(5)).await.unwrap();

        assert_eq!(stats.fetch_errors, 1);
        assert_eq!(stats.symbols_fetched, 1);
        assert_eq!(stored(&store).len(), 1);
    }

    #[tokio::test]
    async fn full_refresh_with_nothing_fetched_keeps_sheet() {
        let source = FakeSource::default();
        let store = MemoryStore::default();
        write_records(&store, "history", &[PricePoint::stamp(bar(1, 10.0), &entry("000001", 1.0))]).unwrap();
        let cfg = HistoryConfig::default();
        let acc = HistoryAccumulator::new(&source, &store, "history", &cfg);

        let stats = acc.refresh(&[entry("000001", 1.0)], RefreshMode::Full, day(5)).await.unwrap();
        assert_eq!(stats.rows_written, 0);
        assert_eq!(stored(&store).len(), 1);
    }

    #[tokio::test]
    async fn incremental_is_idempotent_within_a_day() {
        let mut source = FakeSource::default();
        source.bars.insert("000001".into(), vec![bar(3, 100.0), bar(4, 101.0), bar(5, 102.0)]);
        let store = MemoryStore::default();
        write_records(&store, "history", &[PricePoint::stamp(bar(3, 100.0), &entry("000001", 1.0))]).unwrap();

        let cfg = HistoryConfig::default();
        let acc = HistoryAccumulator::new(&source, &store, "history", &cfg);
        let universe = vec![entry("000001", 1.0)];

        let first = acc.refresh(&universe, RefreshMode::Incremental, day(5)).await.unwrap();
        assert!(!first.skipped);
        // 3rd is already stored; only 4th and 5th are new
        assert_eq!(first.rows_written, 2);
        let after_first = stored(&store);
        assert_eq!(after_first.len(), 3);
        assert_unique_keys(&after_first);

        let writes = store.write_calls();
        let second = acc.refresh(&universe, RefreshMode::Incremental, day(5)).await.unwrap();
        assert!(second.skipped);
        assert_eq!(store.write_calls(), writes);
        assert_eq!(stored(&store), after_first);
        assert_eq!(source.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn incremental_window_is_short() {
        let mut source = FakeSource::default();
        source.bars.insert("000001".into(), vec![bar(10, 100.0)]);
        let store = MemoryStore::default();
        write_records(&store, "history", &[PricePoint::stamp(bar(1, 100.0), &entry("000001", 1.0))]).unwrap();
        let cfg = HistoryConfig::default();
        let acc = HistoryAccumulator::new(&source, &store, "history", &cfg);

        acc.refresh(&[entry("000001", 1.0)], RefreshMode::Incremental, day(10)).await.unwrap();
        let calls = source.calls.lock().unwrap();
        assert_eq!(calls[0].1, day(7));
        assert_eq!(calls[0].2, day(10));
    }

    #[tokio::test]
    async fn incremental_on_empty_sheet_bootstraps() {
        let mut source = FakeSource::default();
        source.bars.insert("000001".into(), vec![bar(1, 100.0), bar(5, 101.0)]);
        let store = MemoryStore::default();
        let cfg = HistoryConfig::default();
        let acc = HistoryAccumulator::new(&source, &store, "history", &cfg);

        let stats = acc.refresh(&[entry("000001", 1.0)], RefreshMode::Incremental, day(5)).await.unwrap();
        assert_eq!(stats.rows_written, 2);

        let cfg = HistoryConfig {
            bootstrap_full_when_empty: false,
            ..HistoryConfig::default()
        };
        let store = MemoryStore::default();
        let acc = HistoryAccumulator::new(&source, &store, "history", &cfg);
        let stats = acc.refresh(&[entry("000001", 1.0)], RefreshMode::Incremental, day(5)).await.unwrap();
        assert_eq!(stats.rows_written, 1);
    }

    #[tokio::test]
    async fn empty_universe_is_a_no_op() {
        let source = FakeSource::default();
        let store = MemoryStore::default();
        let cfg = HistoryConfig::default();
        let acc = HistoryAccumulator::new(&source, &store, "history", &cfg);

        let stats = acc.refresh(&[], RefreshMode::Full, day(5)).await.unwrap();
        assert_eq!(stats, RefreshStats::default());
        assert_eq!(store.write_calls(), 0);
    }

    #[test]
    fn dedup_keeps_last_fetched() {
        let e = entry("000001", 1.0);
        let points = vec![
            PricePoint::stamp(bar(3, 100.0), &e),
            PricePoint::stamp(bar(4, 101.0), &e),
            PricePoint::stamp(bar(3, 999.0), &e),
        ];
        let out = dedup_last_wins(points);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].date, day(4));
        assert_eq!(out[1].close, 999.0);
    }
}
