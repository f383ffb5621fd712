//! Universe filter: narrows the full listing to the quant target set.
//!
//! A symbol survives when all of these hold:
//!   1. market cap ≥ the configured quantile (default 0.8) of the run's caps
//!   2. volume > the liquidity floor (default 50 000)
//!   3. listed on KOSPI or KOSDAQ
//!   4. name matches none of the blacklist patterns (SPACs, numbered
//!      reissues, preferred shares)
//! Survivors are ranked by traded value, descending, and capped.

use crate::config::UniverseConfig;
use crate::models::{SymbolRecord, UniverseEntry};
use anyhow::{Context, Result};
use regex::RegexSet;
use tracing::{debug, info, warn};

pub struct UniverseFilter {
    max_entries: usize,
    market_cap_quantile: f64,
    min_volume: u64,
    blacklist: RegexSet,
}

impl UniverseFilter {
    pub fn new(config: &UniverseConfig) -> Result<Self> {
        let blacklist = RegexSet::new(&config.name_blacklist)
            .context("Invalid universe.name_blacklist pattern")?;
        Ok(Self {
            max_entries: config.max_entries,
            market_cap_quantile: config.market_cap_quantile,
            min_volume: config.min_volume,
            blacklist,
        })
    }

    pub fn is_blacklisted(&self, name: &str) -> bool {
        self.blacklist.is_match(name.trim())
    }

    pub fn apply(&self, symbols: &[SymbolRecord]) -> Vec<UniverseEntry> {
        let caps: Vec<f64> = symbols.iter().map(|s| s.market_cap).collect();
        let Some(cap_floor) = quantile(&caps, self.market_cap_quantile) else {
            warn!("Universe filter: empty listing, nothing to select");
            return vec![];
        };

        let mut survivors: Vec<&SymbolRecord> = symbols
            .iter()
            .filter(|s| s.market_cap >= cap_floor)
            .filter(|s| s.volume > self.min_volume)
            .filter(|s| s.market.is_main_board())
            .filter(|s| !self.is_blacklisted(&s.name))
            .collect();

        survivors.sort_by(|a, b| b.traded_value.total_cmp(&a.traded_value));
        survivors.truncate(self.max_entries);

        debug!("Universe filter: market cap floor {:.0}", cap_floor);
        if survivors.is_empty() {
            warn!("Universe filter: no symbol passed ({} screened)", symbols.len());
        } else {
            info!(
                "Universe filter: {} of {} symbols selected",
                survivors.len(),
                symbols.len()
            );
        }

        survivors.into_iter().map(UniverseEntry::from).collect()
    }
}

/// Linear-interpolated quantile (the usual "type 7" definition).
/// `None` for an empty sample.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Market;

    fn symbol(code: &str, name: &str, market: Market, cap: f64, volume: u64, traded: f64) -> SymbolRecord {
        SymbolRecord {
            code: code.to_string(),
            name: name.to_string(),
            market,
            close: 1000.0,
            change_ratio: 0.0,
            volume,
            traded_value: traded,
            market_cap: cap,
            shares: 1_000_000,
        }
    }

    fn filter(max_entries: usize) -> UniverseFilter {
        UniverseFilter::new(&UniverseConfig {
            max_entries,
            ..UniverseConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn small_and_illiquid_symbol_is_dropped() {
        let input = vec![
            symbol("000001", "A", Market::PrimaryBoard, 20_000.0, 100_000, 1.0),
            symbol("000002", "B", Market::PrimaryBoard, 50.0, 10, 1.0),
        ];
        let out = filter(250).apply(&input);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "A");
    }

    #[test]
    fn quantile_interpolates() {
        assert_eq!(quantile(&[], 0.8), None);
        assert_eq!(quantile(&[7.0], 0.8), Some(7.0));
        // pos = 0.8 * 4 = 3.2 → 4 + 0.2 * (5 - 4)
        let q = quantile(&[5.0, 1.0, 3.0, 2.0, 4.0], 0.8).unwrap();
        assert!((q - 4.2).abs() < 1e-9);
        assert_eq!(quantile(&[1.0, 2.0], 0.0), Some(1.0));
        assert_eq!(quantile(&[1.0, 2.0], 1.0), Some(2.0));
    }

    #[test]
    fn blacklist_patterns() {
        let f = filter(250);
        assert!(f.is_blacklisted("미래에셋비전스팩1호"));
        assert!(f.is_blacklisted("하나금융제25호"));
        assert!(f.is_blacklisted("삼성전자우"));
        assert!(f.is_blacklisted("현대차2우B"));
        assert!(f.is_blacklisted("LG화학우A"));
        assert!(!f.is_blacklisted("삼성전자"));
        assert!(!f.is_blacklisted("우리금융지주"));
        assert!(!f.is_blacklisted("현대차2우D"));
    }

    #[test]
    fn every_rule_is_enforced() {
        // Ten equal caps keep the quantile floor at 1e12 for everyone.
        let mut input: Vec<SymbolRecord> = (0..6)
            .map(|i| symbol(&format!("00000{}", i), &format!("종목{}", i), Market::PrimaryBoard, 1e12, 60_000, i as f64))
            .collect();
        input.push(symbol("100000", "코넥스종목", Market::OtherBoard, 1e12, 60_000, 99.0));
        input.push(symbol("100001", "삼성전자우", Market::PrimaryBoard, 1e12, 60_000, 98.0));
        input.push(symbol("100002", "거래적음", Market::SecondaryBoard, 1e12, 50_000, 97.0));
        input.push(symbol("100003", "코스닥대형", Market::SecondaryBoard, 1e12, 50_001, 96.0));

        let f = filter(250);
        let out = f.apply(&input);
        let floor = quantile(&input.iter().map(|s| s.market_cap).collect::<Vec<_>>(), 0.8).unwrap();

        assert_eq!(out.len(), 7);
        assert_eq!(out[0].code, "100003");
        for e in &out {
            assert!(e.market_cap >= floor);
            assert!(e.volume > 50_000);
            assert!(e.market.is_main_board());
            assert!(!f.is_blacklisted(&e.name));
        }
        assert!(out.windows(2).all(|w| w[0].traded_value >= w[1].traded_value));
    }

    #[test]
    fn output_is_capped_and_sorted() {
        let input: Vec<SymbolRecord> = (0..20)
            .map(|i| symbol(&format!("{:06}", i), &format!("S{}", i), Market::SecondaryBoard, 5e11, 1_000_000, (i * 7 % 20) as f64))
            .collect();
        let out = filter(3).apply(&input);
        assert_eq!(out.len(), 3);
        assert!(out.windows(2).all(|w| w[0].traded_value >= w[1].traded_value));
        assert_eq!(out[0].traded_value, 19.0);
    }

    #[test]
    fn empty_input_gives_empty_universe() {
        assert!(filter(250).apply(&[]).is_empty());
    }

    #[test]
    fn bad_pattern_is_rejected() {
        let cfg = UniverseConfig {
            name_blacklist: vec!["(".into()],
            ..UniverseConfig::default()
        };
        assert!(UniverseFilter::new(&cfg).is_err());
    }
}
