use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Market board ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Market {
    /// KOSPI
    PrimaryBoard,
    /// KOSDAQ (including the KOSDAQ GLOBAL segment)
    SecondaryBoard,
    /// KONEX and anything else
    OtherBoard,
}

impl Market {
    /// Map a listing's market label onto a board.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_uppercase();
        if label == "KOSPI" || label == "STK" {
            Market::PrimaryBoard
        } else if label.starts_with("KOSDAQ") || label == "KSQ" {
            Market::SecondaryBoard
        } else {
            Market::OtherBoard
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Market::PrimaryBoard => "KOSPI",
            Market::SecondaryBoard => "KOSDAQ",
            Market::OtherBoard => "OTHER",
        }
    }

    pub fn is_main_board(&self) -> bool {
        matches!(self, Market::PrimaryBoard | Market::SecondaryBoard)
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Listing snapshot ──────────────────────────────────────────────────────────

/// One listed issue as seen in today's market snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SymbolRecord {
    pub code: String,
    pub name: String,
    pub market: Market,
    pub close: f64,
    pub change_ratio: f64,
    pub volume: u64,
    pub traded_value: f64,
    pub market_cap: f64,
    pub shares: u64,
}

/// A symbol retained by the universe filter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UniverseEntry {
    pub code: String,
    pub name: String,
    pub market: Market,
    pub market_cap: f64,
    pub volume: u64,
    pub traded_value: f64,
}

impl From<&SymbolRecord> for UniverseEntry {
    fn from(r: &SymbolRecord) -> Self {
        Self {
            code: r.code.clone(),
            name: r.name.clone(),
            market: r.market,
            market_cap: r.market_cap,
            volume: r.volume,
            traded_value: r.traded_value,
        }
    }
}

// ── Price history ─────────────────────────────────────────────────────────────

/// Raw daily bar as returned by a price-history source (no identity attached).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// A stored history row, keyed by `(date, code)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub code: String,
    pub name: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    /// Captured from the universe snapshot at collection time.
    pub market_cap: f64,
}

impl PricePoint {
    pub fn stamp(bar: DailyBar, entry: &UniverseEntry) -> Self {
        Self {
            date: bar.date,
            code: entry.code.clone(),
            name: entry.name.clone(),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            market_cap: entry.market_cap,
        }
    }
}

// ── Scoring ───────────────────────────────────────────────────────────────────

/// Per-symbol aggregate over every stored row for that code.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolProfile {
    pub code: String,
    pub name: String,
    pub high52: f64,
    pub low52: f64,
    pub last_close: f64,
    pub last_market_cap: f64,
    pub last_volume: u64,
    pub last_date: NaiveDate,
}

/// Individual factor contributions; `total` is the clamped sum.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreBreakdown {
    pub size: f64,
    pub position: f64,
    pub volatility: f64,
    pub liquidity: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredProfile {
    pub profile: SymbolProfile,
    pub breakdown: ScoreBreakdown,
}

impl ScoredProfile {
    pub fn score(&self) -> f64 {
        self.breakdown.total
    }
}

// ── Recommendation log ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub date: NaiveDate,
    pub code: String,
    pub name: String,
    pub score: f64,
    pub close: f64,
    pub high52: f64,
    pub low52: f64,
    pub volume: u64,
    pub narrative: Option<String>,
}
