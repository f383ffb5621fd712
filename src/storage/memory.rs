use crate::error::QuantError;
use crate::storage::{Row, TabularStore};
use anyhow::{Result, bail};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Default)]
struct Sheet {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// In-process store for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sheets: Mutex<BTreeMap<String, Sheet>>,
    writes: Mutex<usize>,
}

impl MemoryStore {
    /// Number of mutating calls (`clear`, `write_all`, `append_rows`) so far.
    pub fn write_calls(&self) -> usize {
        *self.writes.lock().unwrap()
    }

    fn bump(&self) {
        *self.writes.lock().unwrap() += 1;
    }

    fn check_width(sheet: &str, width: usize, rows: &[Vec<String>]) -> Result<()> {
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(QuantError::RowShape {
                sheet: sheet.to_string(),
                expected: width,
                got: bad.len(),
            }
            .into());
        }
        Ok(())
    }
}

impl TabularStore for MemoryStore {
    fn clear(&self, sheet: &str) -> Result<()> {
        self.bump();
        self.sheets.lock().unwrap().remove(sheet);
        Ok(())
    }

    fn header(&self, sheet: &str) -> Result<Option<Vec<String>>> {
        Ok(self.sheets.lock().unwrap().get(sheet).map(|s| s.header.clone()))
    }

    fn read_all(&self, sheet: &str) -> Result<Vec<Row>> {
        let sheets = self.sheets.lock().unwrap();
        let Some(s) = sheets.get(sheet) else {
            return Ok(vec![]);
        };
        Ok(s.rows
            .iter()
            .map(|r| s.header.iter().cloned().zip(r.iter().cloned()).collect())
            .collect())
    }

    fn write_all(&self, sheet: &str, header: &[&str], rows: &[Vec<String>]) -> Result<()> {
        Self::check_width(sheet, header.len(), rows)?;
        self.bump();
        self.sheets.lock().unwrap().insert(
            sheet.to_string(),
            Sheet {
                header: header.iter().map(|h| h.to_string()).collect(),
                rows: rows.to_vec(),
            },
        );
        Ok(())
    }

    fn append_rows(&self, sheet: &str, rows: &[Vec<String>]) -> Result<()> {
        let mut sheets = self.sheets.lock().unwrap();
        let Some(s) = sheets.get_mut(sheet) else {
            bail!("cannot append to sheet {}: it has no header", sheet);
        };
        Self::check_width(sheet, s.header.len(), rows)?;
        s.rows.extend_from_slice(rows);
        drop(sheets);
        self.bump();
        Ok(())
    }
}
