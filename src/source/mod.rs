pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::config::SourceConfig;
use crate::models::{DailyBar, SymbolRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDate};
use tracing::{debug, info, warn};

use self::cleaner::sanitise_bar;
use self::http_client::HttpClient;
use self::parsers::{parse_krx_listing, parse_naver_chart};

// ── Source traits ─────────────────────────────────────────────────────────────

/// Supplies the full list of listed symbols for one market scope.
#[async_trait]
pub trait MarketSnapshotSource: Send + Sync {
    async fn list_symbols(&self, market: &str) -> Result<Vec<SymbolRecord>>;
}

/// Supplies a daily OHLCV series for one code; may return an empty list.
#[async_trait]
pub trait PriceHistorySource: Send + Sync {
    async fn fetch_series(&self, code: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyBar>>;
}

// ── KRX listing ───────────────────────────────────────────────────────────────

const KRX_LISTING_BLD: &str = "dbms/MDC/STAT/standard/MDCSTAT01501";
const KRX_REFERER: &str = "http://data.krx.co.kr/contents/MDC/MDI/mdiLoader/index.cmd";
/// Weekends plus the longest holiday run.
const KRX_MAX_LOOKBACK_DAYS: i64 = 7;

pub struct KrxSnapshotSource {
    client: HttpClient,
    url: String,
}

impl KrxSnapshotSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
            url: config.krx_url.clone(),
        })
    }

    fn market_id(market: &str) -> &'static str {
        match market.trim().to_uppercase().as_str() {
            "KOSPI" => "STK",
            "KOSDAQ" => "KSQ",
            "KONEX" => "KNX",
            _ => "ALL",
        }
    }

    async fn fetch_day(&self, market_id: &str, day: NaiveDate) -> Result<Vec<SymbolRecord>> {
        let trd_dd = day.format("%Y%m%d").to_string();
        let body = self
            .client
            .post_form(
                &self.url,
                KRX_REFERER,
                &[
                    ("bld", KRX_LISTING_BLD),
                    ("mktId", market_id),
                    ("trdDd", trd_dd.as_str()),
                    ("share", "1"),
                    ("money", "1"),
                    ("csvxls_isNo", "false"),
                ],
            )
            .await
            .with_context(|| format!("KRX listing for {}", trd_dd))?;

        Ok(parse_krx_listing(&body)?)
    }
}

#[async_trait]
impl MarketSnapshotSource for KrxSnapshotSource {
    async fn list_symbols(&self, market: &str) -> Result<Vec<SymbolRecord>> {
        let market_id = Self::market_id(market);
        let today = Local::now().date_naive();

        // Non-trading days answer with zero-volume rows or nothing at all.
        for back in 0..=KRX_MAX_LOOKBACK_DAYS {
            let day = today - Duration::days(back);
            let records = self.fetch_day(market_id, day).await?;
            if records.iter().any(|r| r.volume > 0) {
                info!("KRX listing {} ({}): {} symbols", day, market_id, records.len());
                return Ok(records);
            }
            debug!("KRX listing empty for {}, stepping back", day);
        }

        warn!("KRX listing empty for the last {} days", KRX_MAX_LOOKBACK_DAYS + 1);
        Ok(vec![])
    }
}

// ── Naver daily chart ─────────────────────────────────────────────────────────

pub struct NaverHistorySource {
    client: HttpClient,
    base_url: String,
}

impl NaverHistorySource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
            base_url: config.naver_url.clone(),
        })
    }

    fn chart_url(&self, code: &str, start: NaiveDate, end: NaiveDate) -> Result<url::Url> {
        let start = start.format("%Y%m%d").to_string();
        let end = end.format("%Y%m%d").to_string();
        url::Url::parse_with_params(
            &self.base_url,
            &[
                ("symbol", code),
                ("requestType", "1"),
                ("startTime", start.as_str()),
                ("endTime", end.as_str()),
                ("timeframe", "day"),
            ],
        )
        .with_context(|| format!("Bad Naver chart URL {}", self.base_url))
    }
}

#[async_trait]
impl PriceHistorySource for NaverHistorySource {
    async fn fetch_series(&self, code: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyBar>> {
        let url = self.chart_url(code, start, end)?;
        let body = self
            .client
            .get_text(url.as_str())
            .await
            .with_context(|| format!("Naver chart for {}", code))?;

        let bars: Vec<DailyBar> = parse_naver_chart(&body)?
            .into_iter()
            .filter_map(|b| sanitise_bar(code, b))
            .filter(|b| b.date >= start && b.date <= end)
            .collect();

        debug!("{}: {} bars {}..{}", code, bars.len(), start, end);
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_scope_ids() {
        assert_eq!(KrxSnapshotSource::market_id("KRX"), "ALL");
        assert_eq!(KrxSnapshotSource::market_id("kosdaq"), "KSQ");
        assert_eq!(KrxSnapshotSource::market_id("KONEX"), "KNX");
    }

    #[test]
    fn naver_chart_url_carries_range() {
        let source = NaverHistorySource::new(&SourceConfig::default()).unwrap();
        let url = source
            .chart_url(
                "005930",
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            )
            .unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("symbol=005930"));
        assert!(query.contains("startTime=20240101"));
        assert!(query.contains("endTime=20240131"));
        assert!(query.contains("timeframe=day"));
    }
}
