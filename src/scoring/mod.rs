//! Composite scoring over accumulated price history.
//!
//! Each code's rows are folded into a [`SymbolProfile`] (52-week high/low and
//! the latest close/volume/market cap), then scored out of 100 from four
//! factors:
//!
//! | factor      | range      | driver                                   |
//! |-------------|------------|------------------------------------------|
//! | size        | 0 ..= 8    | market cap in 억 (1e8 KRW)               |
//! | position    | 0 ..= 45   | where close sits in the 52-week range    |
//! | volatility  | -15 ..= 6  | 52-week range relative to the low        |
//! | liquidity   | -10 ..= 10 | latest volume                            |
//!
//! Any unusable input (non-positive cap/close/low, flat range, non-finite
//! numbers) scores 0 instead of failing the run.

use crate::models::{PricePoint, ScoreBreakdown, ScoredProfile, SymbolProfile};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Market cap unit for the size factor: 1억 KRW.
const HUNDRED_MILLION: f64 = 1e8;

/// Group history by code. Ties on the latest date resolve to the row stored last.
pub fn build_profiles(history: &[PricePoint]) -> Vec<SymbolProfile> {
    let mut profiles: BTreeMap<&str, SymbolProfile> = BTreeMap::new();

    for p in history {
        profiles
            .entry(p.code.as_str())
            .and_modify(|prof| {
                prof.high52 = prof.high52.max(p.high);
                prof.low52 = prof.low52.min(p.low);
                if p.date >= prof.last_date {
                    prof.name = p.name.clone();
                    prof.last_close = p.close;
                    prof.last_market_cap = p.market_cap;
                    prof.last_volume = p.volume;
                    prof.last_date = p.date;
                }
            })
            .or_insert_with(|| SymbolProfile {
                code: p.code.clone(),
                name: p.name.clone(),
                high52: p.high,
                low52: p.low,
                last_close: p.close,
                last_market_cap: p.market_cap,
                last_volume: p.volume,
                last_date: p.date,
            });
    }

    profiles.into_values().collect()
}

/// Profile and score every code in `history`. Output order carries no meaning.
pub fn score(history: &[PricePoint]) -> Vec<ScoredProfile> {
    if history.is_empty() {
        warn!("Scoring: no history rows");
        return vec![];
    }

    let scored: Vec<ScoredProfile> = build_profiles(history)
        .into_iter()
        .map(|profile| {
            let breakdown = score_profile(&profile);
            ScoredProfile { profile, breakdown }
        })
        .collect();

    debug!("Scoring: {} profiles from {} rows", scored.len(), history.len());
    scored
}

pub fn score_profile(p: &SymbolProfile) -> ScoreBreakdown {
    let inputs = [p.last_market_cap, p.last_close, p.high52, p.low52];
    if inputs.iter().any(|v| !v.is_finite())
        || p.last_market_cap <= 0.0
        || p.last_close <= 0.0
        || p.low52 <= 0.0
        || p.high52 <= p.low52
    {
        return ScoreBreakdown::default();
    }

    let size = size_component(p.last_market_cap);
    let position = position_component(p.last_close, p.high52, p.low52);
    let volatility = volatility_component(p.high52, p.low52);
    let liquidity = liquidity_component(p.last_volume);
    let total = (size + position + volatility + liquidity).clamp(0.0, 100.0);

    ScoreBreakdown {
        size,
        position,
        volatility,
        liquidity,
        total,
    }
}

/// Up to 8 points, ramping between 100억 and 5000억; 1조+ gets the full 8.
pub fn size_component(market_cap: f64) -> f64 {
    let m = market_cap / HUNDRED_MILLION;
    if m >= 10_000.0 {
        8.0
    } else if m >= 1_000.0 {
        8.0 * (m.min(5_000.0) - 1_000.0) / 4_000.0
    } else if m >= 100.0 {
        2.0 * (m - 100.0) / 900.0
    } else {
        0.0
    }
}

/// Up to 45 points; peaks at 15–30% of the 52-week range above the low.
pub fn position_component(close: f64, high52: f64, low52: f64) -> f64 {
    let position = ((close - low52) / (high52 - low52)).clamp(0.0, 1.0);

    let raw = if (0.15..=0.30).contains(&position) {
        40.0 + 5.0 * (0.30 - position) / 0.15
    } else if position < 0.15 {
        35.0 - 10.0 * (0.15 - position)
    } else if position <= 0.50 {
        28.0 + 5.0 * (0.50 - position) / 0.20
    } else {
        18.0 - 20.0 * (position - 0.50)
    };

    raw.clamp(0.0, 45.0)
}

pub fn volatility_component(high52: f64, low52: f64) -> f64 {
    let volatility = (high52 - low52) / low52;
    if volatility > 2.0 {
        -15.0
    } else if volatility > 1.2 {
        -8.0
    } else if volatility < 0.8 {
        6.0
    } else {
        0.0
    }
}

/// Up to 10 points at 500k shares; thin trading (< 200k) costs 10.
pub fn liquidity_component(volume: u64) -> f64 {
    let volume = volume as f64;
    let mut points = (volume / 500_000.0 * 10.0).min(10.0);
    if volume < 200_000.0 {
        points -= 10.0;
    }
    points
}
