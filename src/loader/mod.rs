//! CSV loader for importing an offline market listing
//! (FinanceDataReader `StockListing` export format).

use crate::models::{Market, SymbolRecord};
use crate::source::MarketSnapshotSource;
use crate::source::cleaner::{normalise_code, parse_count, parse_number};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Snapshot source backed by a listing CSV on disk.
pub struct FileSnapshotSource {
    path: PathBuf,
}

impl FileSnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MarketSnapshotSource for FileSnapshotSource {
    async fn list_symbols(&self, market: &str) -> Result<Vec<SymbolRecord>> {
        let records = load_listing_csv(&self.path)?;
        let scope = market.trim().to_uppercase();
        if scope == "KRX" || scope.is_empty() {
            return Ok(records);
        }

        let wanted = Market::from_label(&scope);
        Ok(records.into_iter().filter(|r| r.market == wanted).collect())
    }
}

pub fn load_listing_csv(path: &Path) -> Result<Vec<SymbolRecord>> {
    debug!("Loading listing from {:?}", path);
    let file = std::fs::File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let records = read_listing(file).with_context(|| format!("Failed to read listing {:?}", path))?;
    info!("{:?}: {} symbols loaded", path, records.len());
    Ok(records)
}

/// Parse a listing CSV. Columns are located by header name; `Code` and `Name`
/// are required, numeric columns default to zero when absent or blank.
pub fn read_listing<R: Read>(input: R) -> Result<Vec<SymbolRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let columns: HashMap<String, usize> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim_start_matches('\u{feff}').to_string(), i))
        .collect();

    for required in ["Code", "Name"] {
        if !columns.contains_key(required) {
            bail!("listing CSV has no '{}' column", required);
        }
    }

    let mut records = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let row = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {}: {}", i + 1, e);
                continue;
            }
        };

        let get = |name: &'static str| cell(&row, &columns, name);
        let code = get("Code");
        if code.is_empty() {
            continue;
        }

        records.push(SymbolRecord {
            code: normalise_code(code),
            name: get("Name").to_string(),
            market: Market::from_label(get("Market")),
            close: parse_number(get("Close")).unwrap_or(0.0).max(0.0),
            // sic: the upstream export misspells this column
            change_ratio: parse_number(get("ChagesRatio")).unwrap_or(0.0),
            volume: parse_count(get("Volume")).unwrap_or(0),
            traded_value: parse_number(get("Amount")).unwrap_or(0.0).max(0.0),
            market_cap: parse_number(get("Marcap")).unwrap_or(0.0).max(0.0),
            shares: parse_count(get("Stocks")).unwrap_or(0),
        });
    }

    Ok(records)
}

fn cell<'a>(row: &'a csv::StringRecord, columns: &HashMap<String, usize>, name: &str) -> &'a str {
    columns.get(name).and_then(|&ix| row.get(ix)).unwrap_or("")
}
