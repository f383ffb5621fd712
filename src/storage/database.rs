use crate::error::QuantError;
use crate::storage::{Row, TabularStore};
use anyhow::{Context, Result};
use duckdb::{Connection, params, params_from_iter};
use std::path::Path;
use tracing::debug;

/// Hidden column that keeps rows in insertion order.
const ORDINAL: &str = "__ord";

// ── DuckDB-backed sheets ──────────────────────────────────────────────────────

/// Each sheet is a table of VARCHAR columns named after the header.
pub struct DuckDbStore {
    conn: Connection,
}

impl DuckDbStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    fn columns(&self, sheet: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT column_name FROM information_schema.columns
               WHERE table_schema = 'main' AND table_name = ?
               ORDER BY ordinal_position"#,
        )?;
        let cols = stmt
            .query_map(params![sheet], |r| r.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(cols.into_iter().filter(|c| c != ORDINAL).collect())
    }
}

/// Insert `rows` inside `conn` (a transaction) starting at `first_ordinal`.
fn insert_rows(conn: &Connection, sheet: &str, width: usize, first_ordinal: i64, rows: &[Vec<String>]) -> Result<()> {
    if let Some(bad) = rows.iter().find(|r| r.len() != width) {
        return Err(QuantError::RowShape {
            sheet: sheet.to_string(),
            expected: width,
            got: bad.len(),
        }
        .into());
    }

    let placeholders = vec!["?"; width].join(", ");
    let sql = format!(
        "INSERT INTO {} VALUES (CAST(? AS BIGINT), {})",
        quote_ident(sheet),
        placeholders
    );

    let mut stmt = conn.prepare(&sql)?;
    for (i, row) in rows.iter().enumerate() {
        let ordinal = (first_ordinal + i as i64).to_string();
        stmt.execute(params_from_iter(std::iter::once(ordinal).chain(row.iter().cloned())))
            .with_context(|| format!("insert into sheet {}", sheet))?;
    }
    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl TabularStore for DuckDbStore {
    fn clear(&self, sheet: &str) -> Result<()> {
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(sheet)))
            .with_context(|| format!("clear sheet {}", sheet))?;
        Ok(())
    }

    fn header(&self, sheet: &str) -> Result<Option<Vec<String>>> {
        let cols = self.columns(sheet)?;
        Ok(if cols.is_empty() { None } else { Some(cols) })
    }

    fn read_all(&self, sheet: &str) -> Result<Vec<Row>> {
        let cols = self.columns(sheet)?;
        if cols.is_empty() {
            return Ok(vec![]);
        }

        let select = cols.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            select,
            quote_ident(sheet),
            ORDINAL
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |r| {
                let mut row = Row::new();
                for (i, col) in cols.iter().enumerate() {
                    let v: Option<String> = r.get(i)?;
                    row.insert(col.clone(), v.unwrap_or_default());
                }
                Ok(row)
            })?
            .collect::<std::result::Result<Vec<Row>, _>>()
            .with_context(|| format!("read sheet {}", sheet))?;

        debug!("{}: read {} rows", sheet, rows.len());
        Ok(rows)
    }

    fn write_all(&self, sheet: &str, header: &[&str], rows: &[Vec<String>]) -> Result<()> {
        let columns = header
            .iter()
            .map(|h| format!("{} VARCHAR", quote_ident(h)))
            .collect::<Vec<_>>()
            .join(", ");

        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {t}; CREATE TABLE {t} ({ord} BIGINT NOT NULL, {columns});",
            t = quote_ident(sheet),
            ord = ORDINAL,
            columns = columns,
        ))
        .with_context(|| format!("recreate sheet {}", sheet))?;
        insert_rows(&tx, sheet, header.len(), 0, rows)?;
        tx.commit()?;
        debug!("{}: wrote {} rows", sheet, rows.len());
        Ok(())
    }

    fn append_rows(&self, sheet: &str, rows: &[Vec<String>]) -> Result<()> {
        let cols = self.columns(sheet)?;
        if cols.is_empty() {
            anyhow::bail!("cannot append to sheet {}: it has no header", sheet);
        }
        if rows.is_empty() {
            return Ok(());
        }

        let next: i64 = self.conn.query_row(
            &format!("SELECT COALESCE(MAX({}), -1) + 1 FROM {}", ORDINAL, quote_ident(sheet)),
            [],
            |r| r.get(0),
        )?;

        let tx = self.conn.unchecked_transaction()?;
        insert_rows(&tx, sheet, cols.len(), next, rows)?;
        tx.commit()?;
        debug!("{}: appended {} rows", sheet, rows.len());
        Ok(())
    }

    fn row_count(&self, sheet: &str) -> Result<usize> {
        if self.columns(sheet)?.is_empty() {
            return Ok(0);
        }
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(sheet)),
            [],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn write_read_append_clear() {
        let store = DuckDbStore::open_in_memory().unwrap();
        assert!(store.header("log").unwrap().is_none());
        assert!(store.read_all("log").unwrap().is_empty());

        store
            .write_all("log", &["date", "code"], &[row(&["2024-05-02", "005930"])])
            .unwrap();
        store.append_rows("log", &[row(&["2024-05-03", "000660"])]).unwrap();

        let rows = store.read_all("log").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["code"], "005930");
        assert_eq!(rows[1]["date"], "2024-05-03");
        assert_eq!(store.row_count("log").unwrap(), 2);
        assert_eq!(store.header("log").unwrap().unwrap(), vec!["date", "code"]);

        store.clear("log").unwrap();
        assert!(store.header("log").unwrap().is_none());
        assert_eq!(store.row_count("log").unwrap(), 0);
    }

    #[test]
    fn write_all_replaces_previous_contents() {
        let store = DuckDbStore::open_in_memory().unwrap();
        store.write_all("t", &["a"], &[row(&["1"]), row(&["2"])]).unwrap();
        store.write_all("t", &["a", "b"], &[row(&["3", "4"])]).unwrap();

        let rows = store.read_all("t").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["b"], "4");
    }

    #[test]
    fn sheet_names_are_quoted() {
        let store = DuckDbStore::open_in_memory().unwrap();
        store.write_all("전체 종목", &["종목 코드"], &[row(&["005930"])]).unwrap();
        assert_eq!(store.read_all("전체 종목").unwrap()[0]["종목 코드"], "005930");
    }

    #[test]
    fn append_without_header_fails() {
        let store = DuckDbStore::open_in_memory().unwrap();
        assert!(store.append_rows("missing", &[row(&["x"])]).is_err());
    }

    #[test]
    fn mismatched_row_width_is_rejected() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let err = store.write_all("t", &["a", "b"], &[row(&["only-one"])]).unwrap_err();
        assert!(err.downcast_ref::<QuantError>().is_some());
    }
}
