use crate::error::QuantError;
use crate::models::{DailyBar, Market, SymbolRecord};
use crate::source::cleaner::{normalise_code, parse_count, parse_date, parse_number};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

// ── KRX listing ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct KrxListingResponse {
    #[serde(rename = "OutBlock_1", default)]
    out_block: Vec<KrxListingRow>,
}

/// One row of the KRX "all listed issues" table; every value is a
/// comma-formatted string.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KrxListingRow {
    #[serde(rename = "ISU_SRT_CD")]
    code: Option<String>,
    #[serde(rename = "ISU_ABBRV")]
    name: Option<String>,
    #[serde(rename = "MKT_NM")]
    market: Option<String>,
    #[serde(rename = "TDD_CLSPRC")]
    close: Option<String>,
    #[serde(rename = "FLUC_RT")]
    change_ratio: Option<String>,
    #[serde(rename = "ACC_TRDVOL")]
    volume: Option<String>,
    #[serde(rename = "ACC_TRDVAL")]
    traded_value: Option<String>,
    #[serde(rename = "MKTCAP")]
    market_cap: Option<String>,
    #[serde(rename = "LIST_SHRS")]
    shares: Option<String>,
}

pub fn parse_krx_listing(body: &str) -> Result<Vec<SymbolRecord>, QuantError> {
    let resp: KrxListingResponse = serde_json::from_str(body)
        .map_err(|e| QuantError::Source(format!("KRX listing JSON: {}", e)))?;

    let total = resp.out_block.len();
    let records: Vec<SymbolRecord> = resp
        .out_block
        .into_iter()
        .filter_map(krx_row_to_record)
        .collect();

    if records.len() < total {
        debug!("KRX listing: dropped {} incomplete rows", total - records.len());
    }
    Ok(records)
}

fn krx_row_to_record(row: KrxListingRow) -> Option<SymbolRecord> {
    let code = row.code.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
    let name = row.name.as_deref().map(str::trim).unwrap_or_default();
    let num = |v: &Option<String>| v.as_deref().and_then(parse_number).unwrap_or(0.0);
    let count = |v: &Option<String>| v.as_deref().and_then(parse_count).unwrap_or(0);

    Some(SymbolRecord {
        code: normalise_code(code),
        name: name.to_string(),
        market: Market::from_label(row.market.as_deref().unwrap_or_default()),
        close: num(&row.close).max(0.0),
        change_ratio: num(&row.change_ratio),
        volume: count(&row.volume),
        traded_value: num(&row.traded_value).max(0.0),
        market_cap: num(&row.market_cap).max(0.0),
        shares: count(&row.shares),
    })
}

// ── Naver daily chart ─────────────────────────────────────────────────────────

/// Parse the Naver `siseJson` payload: a single-quoted pseudo-JSON array whose
/// first row is a header, followed by
/// `["20240102", open, high, low, close, volume, foreign_ratio]` rows.
pub fn parse_naver_chart(body: &str) -> Result<Vec<DailyBar>, QuantError> {
    let normalised = body.trim().replace('\'', "\"");
    if normalised.is_empty() {
        return Ok(vec![]);
    }

    let rows: Vec<Vec<Value>> = serde_json::from_str(&normalised)
        .map_err(|e| QuantError::Source(format!("Naver chart payload: {}", e)))?;

    let mut bars = Vec::with_capacity(rows.len().saturating_sub(1));
    for (i, row) in rows.iter().enumerate().skip(1) {
        match naver_row_to_bar(row) {
            Some(bar) => bars.push(bar),
            None => warn!("Naver chart row {} unparsable: {:?}", i, row),
        }
    }
    Ok(bars)
}

fn naver_row_to_bar(row: &[Value]) -> Option<DailyBar> {
    if row.len() < 6 {
        return None;
    }
    let date = parse_date(row[0].as_str()?)?;
    let num = |v: &Value| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    };

    Some(DailyBar {
        date,
        open: num(&row[1])?,
        high: num(&row[2])?,
        low: num(&row[3])?,
        close: num(&row[4])?,
        volume: num(&row[5]).filter(|v| *v >= 0.0)?.round() as u64,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
