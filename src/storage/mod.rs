//! Tabular store abstraction and the typed record codec at its boundary.
//!
//! A store holds named sheets; each sheet is a header plus string rows. The
//! pipeline never touches rows directly: every entity goes through
//! [`SheetRecord`], which fails with a named field error instead of letting a
//! missing or malformed cell leak into the numbers.

pub mod database;
#[cfg(test)]
pub mod memory;

use crate::error::QuantError;
use crate::models::{Market, PricePoint, Recommendation, SymbolRecord, UniverseEntry};
use crate::source::cleaner::{normalise_code, parse_date};
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// One sheet row keyed by column name.
pub type Row = BTreeMap<String, String>;

// ── Store trait ───────────────────────────────────────────────────────────────

pub trait TabularStore {
    /// Remove the sheet and its header.
    fn clear(&self, sheet: &str) -> Result<()>;

    /// Column names, or `None` when the sheet does not exist.
    fn header(&self, sheet: &str) -> Result<Option<Vec<String>>>;

    /// All rows in insertion order; empty when the sheet does not exist.
    fn read_all(&self, sheet: &str) -> Result<Vec<Row>>;

    /// Replace the sheet with `header` + `rows`.
    fn write_all(&self, sheet: &str, header: &[&str], rows: &[Vec<String>]) -> Result<()>;

    /// Append rows laid out in the sheet's existing column order.
    fn append_rows(&self, sheet: &str, rows: &[Vec<String>]) -> Result<()>;

    fn row_count(&self, sheet: &str) -> Result<usize> {
        Ok(self.read_all(sheet)?.len())
    }
}

// ── Record codec ──────────────────────────────────────────────────────────────

pub trait SheetRecord: Sized {
    const HEADER: &'static [&'static str];

    fn to_row(&self) -> Vec<String>;

    fn from_row(sheet: &str, row: &Row) -> std::result::Result<Self, QuantError>;
}

pub fn read_records<R: SheetRecord>(store: &dyn TabularStore, sheet: &str) -> Result<Vec<R>> {
    let rows = store.read_all(sheet)?;
    let records = rows
        .iter()
        .map(|row| R::from_row(sheet, row))
        .collect::<std::result::Result<Vec<R>, QuantError>>()?;
    Ok(records)
}

/// Replace a sheet with `records`.
pub fn write_records<R: SheetRecord>(store: &dyn TabularStore, sheet: &str, records: &[R]) -> Result<()> {
    let rows: Vec<Vec<String>> = records.iter().map(SheetRecord::to_row).collect();
    store.write_all(sheet, R::HEADER, &rows)
}

/// Append `records`, creating the sheet (header first) when it does not exist.
/// Cells are reordered to match an existing header; columns the record does
/// not know are left blank.
pub fn append_records<R: SheetRecord>(store: &dyn TabularStore, sheet: &str, records: &[R]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    let rows: Vec<Vec<String>> = records.iter().map(SheetRecord::to_row).collect();
    let Some(existing) = store.header(sheet)? else {
        return store.write_all(sheet, R::HEADER, &rows);
    };

    if existing.iter().map(String::as_str).eq(R::HEADER.iter().copied()) {
        return store.append_rows(sheet, &rows);
    }

    let positions: Vec<Option<usize>> = existing
        .iter()
        .map(|col| R::HEADER.iter().position(|h| h == col))
        .collect();
    let aligned: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            positions
                .iter()
                .map(|p| p.map(|i| row[i].clone()).unwrap_or_default())
                .collect()
        })
        .collect();
    store.append_rows(sheet, &aligned)
}

/// Typed access to the cells of one row.
struct Cells<'a> {
    sheet: &'a str,
    row: &'a Row,
}

impl<'a> Cells<'a> {
    fn new(sheet: &'a str, row: &'a Row) -> Self {
        Self { sheet, row }
    }

    fn text(&self, field: &str) -> std::result::Result<&'a str, QuantError> {
        match self.row.get(field).map(|v| v.trim()) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(QuantError::MissingField {
                sheet: self.sheet.to_string(),
                field: field.to_string(),
            }),
        }
    }

    fn optional(&self, field: &str) -> Option<String> {
        self.row
            .get(field)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn invalid(&self, field: &str, value: &str) -> QuantError {
        QuantError::InvalidField {
            sheet: self.sheet.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    fn number(&self, field: &str) -> std::result::Result<f64, QuantError> {
        let raw = self.text(field)?;
        raw.replace(',', "")
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| self.invalid(field, raw))
    }

    fn non_negative(&self, field: &str) -> std::result::Result<f64, QuantError> {
        let v = self.number(field)?;
        if v < 0.0 {
            return Err(self.invalid(field, self.text(field)?));
        }
        Ok(v)
    }

    fn positive(&self, field: &str) -> std::result::Result<f64, QuantError> {
        let v = self.number(field)?;
        if v <= 0.0 {
            return Err(self.invalid(field, self.text(field)?));
        }
        Ok(v)
    }

    fn count(&self, field: &str) -> std::result::Result<u64, QuantError> {
        let v = self.non_negative(field)?;
        Ok(v.round() as u64)
    }

    fn date(&self, field: &str) -> std::result::Result<NaiveDate, QuantError> {
        let raw = self.text(field)?;
        parse_date(raw).ok_or_else(|| self.invalid(field, raw))
    }

    fn code(&self) -> std::result::Result<String, QuantError> {
        Ok(normalise_code(self.text("code")?))
    }
}

impl SheetRecord for SymbolRecord {
    const HEADER: &'static [&'static str] = &[
        "code",
        "name",
        "market",
        "close",
        "change_ratio",
        "volume",
        "traded_value",
        "market_cap",
        "shares",
    ];

    fn to_row(&self) -> Vec<String> {
        vec![
            self.code.clone(),
            self.name.clone(),
            self.market.label().to_string(),
            self.close.to_string(),
            self.change_ratio.to_string(),
            self.volume.to_string(),
            self.traded_value.to_string(),
            self.market_cap.to_string(),
            self.shares.to_string(),
        ]
    }

    fn from_row(sheet: &str, row: &Row) -> std::result::Result<Self, QuantError> {
        let c = Cells::new(sheet, row);
        Ok(Self {
            code: c.code()?,
            name: c.text("name")?.to_string(),
            market: Market::from_label(c.text("market")?),
            close: c.non_negative("close")?,
            change_ratio: c.number("change_ratio")?,
            volume: c.count("volume")?,
            traded_value: c.non_negative("traded_value")?,
            market_cap: c.non_negative("market_cap")?,
            shares: c.count("shares")?,
        })
    }
}

impl SheetRecord for UniverseEntry {
    const HEADER: &'static [&'static str] = &["code", "name", "market", "market_cap", "volume", "traded_value"];

    fn to_row(&self) -> Vec<String> {
        vec![
            self.code.clone(),
            self.name.clone(),
            self.market.label().to_string(),
            self.market_cap.to_string(),
            self.volume.to_string(),
            self.traded_value.to_string(),
        ]
    }

    fn from_row(sheet: &str, row: &Row) -> std::result::Result<Self, QuantError> {
        let c = Cells::new(sheet, row);
        Ok(Self {
            code: c.code()?,
            name: c.text("name")?.to_string(),
            market: Market::from_label(c.text("market")?),
            market_cap: c.non_negative("market_cap")?,
            volume: c.count("volume")?,
            traded_value: c.non_negative("traded_value")?,
        })
    }
}

impl SheetRecord for PricePoint {
    const HEADER: &'static [&'static str] = &[
        "date",
        "code",
        "name",
        "open",
        "high",
        "low",
        "close",
        "volume",
        "market_cap",
    ];

    fn to_row(&self) -> Vec<String> {
        vec![
            self.date.format("%Y-%m-%d").to_string(),
            self.code.clone(),
            self.name.clone(),
            self.open.to_string(),
            self.high.to_string(),
            self.low.to_string(),
            self.close.to_string(),
            self.volume.to_string(),
            self.market_cap.to_string(),
        ]
    }

    fn from_row(sheet: &str, row: &Row) -> std::result::Result<Self, QuantError> {
        let c = Cells::new(sheet, row);
        Ok(Self {
            date: c.date("date")?,
            code: c.code()?,
            name: c.text("name")?.to_string(),
            open: c.positive("open")?,
            high: c.positive("high")?,
            low: c.positive("low")?,
            close: c.positive("close")?,
            volume: c.count("volume")?,
            market_cap: c.non_negative("market_cap")?,
        })
    }
}

impl SheetRecord for Recommendation {
    const HEADER: &'static [&'static str] = &[
        "date",
        "code",
        "name",
        "score",
        "close",
        "high52",
        "low52",
        "volume",
        "narrative",
    ];

    fn to_row(&self) -> Vec<String> {
        vec![
            self.date.format("%Y-%m-%d").to_string(),
            self.code.clone(),
            self.name.clone(),
            format!("{:.2}", self.score),
            self.close.to_string(),
            self.high52.to_string(),
            self.low52.to_string(),
            self.volume.to_string(),
            self.narrative.clone().unwrap_or_default(),
        ]
    }

    fn from_row(sheet: &str, row: &Row) -> std::result::Result<Self, QuantError> {
        let c = Cells::new(sheet, row);
        Ok(Self {
            date: c.date("date")?,
            code: c.code()?,
            name: c.text("name")?.to_string(),
            score: c.number("score")?,
            close: c.positive("close")?,
            high52: c.positive("high52")?,
            low52: c.positive("low52")?,
            volume: c.count("volume")?,
            narrative: c.optional("narrative"),
        })
    }
}
