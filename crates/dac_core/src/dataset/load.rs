use std::fs;
use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::Connection;

use super::{Cell, Column, Table};
use crate::error::{codes, AppError};

impl Table {
    /// Header row required. Short rows are padded with nulls; long rows are an error.
    pub fn from_csv_str(csv_text: &str) -> Result<Table, AppError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(csv_text.as_bytes());

        let headers: Vec<String> = rdr
            .headers()
            .map_err(|e| {
                AppError::new(codes::DATASET_LOAD_FAILED, "Failed to read CSV headers")
                    .with_details(e.to_string())
            })?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
            return Err(AppError::new(codes::DATASET_INVALID, "CSV has no header row"));
        }

        let mut values: Vec<Vec<Cell>> = vec![Vec::new(); headers.len()];
        for (idx, rec) in rdr.records().enumerate() {
            let rec = rec.map_err(|e| {
                AppError::new(codes::DATASET_LOAD_FAILED, "Failed to read CSV row")
                    .with_details(format!("row={}; err={}", idx + 1, e))
            })?;
            if rec.len() > headers.len() {
                return Err(AppError::new(codes::DATASET_INVALID, "CSV row has more fields than the header")
                    .with_details(format!("row={}; fields={}; header={}", idx + 1, rec.len(), headers.len())));
            }
            for (col, slot) in values.iter_mut().enumerate() {
                slot.push(rec.get(col).map(Cell::parse).unwrap_or(Cell::Null));
            }
        }

        let columns = headers
            .into_iter()
            .zip(values)
            .map(|(name, vals)| Column::new(name, vals))
            .collect();
        Table::new(columns)
    }

    pub fn from_csv_path(path: &Path) -> Result<Table, AppError> {
        let text = fs::read_to_string(path).map_err(|e| {
            AppError::new(codes::DATASET_LOAD_FAILED, "Failed to read CSV file")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        Table::from_csv_str(&text)
    }

    /// Loads every row of `table_name`. Integers and reals become numbers, text stays text,
    /// blobs are treated as missing.
    pub fn from_sqlite(conn: &Connection, table_name: &str) -> Result<Table, AppError> {
        if table_name.trim().is_empty() {
            return Err(AppError::new(codes::DATASET_INVALID, "SQLite table name is empty"));
        }
        let sql = format!("SELECT * FROM {}", quote_identifier(table_name));
        let mut stmt = conn.prepare(&sql).map_err(|e| {
            AppError::new(codes::DATASET_LOAD_FAILED, "Failed to prepare SQLite query")
                .with_details(format!("table={}; err={}", table_name, e))
        })?;
        let names: Vec<String> = stmt.column_names().into_iter().map(|s| s.to_string()).collect();
        let mut values: Vec<Vec<Cell>> = vec![Vec::new(); names.len()];

        let mut rows = stmt.query([]).map_err(|e| {
            AppError::new(codes::DATASET_LOAD_FAILED, "Failed to query SQLite table")
                .with_details(format!("table={}; err={}", table_name, e))
        })?;
        while let Some(row) = rows.next().map_err(|e| {
            AppError::new(codes::DATASET_LOAD_FAILED, "Failed to read SQLite row")
                .with_details(format!("table={}; err={}", table_name, e))
        })? {
            for (i, slot) in values.iter_mut().enumerate() {
                let v = row.get_ref(i).map_err(|e| {
                    AppError::new(codes::DATASET_LOAD_FAILED, "Failed to read SQLite value")
                        .with_details(format!("table={}; column={}; err={}", table_name, i, e))
                })?;
                slot.push(match v {
                    ValueRef::Null | ValueRef::Blob(_) => Cell::Null,
                    ValueRef::Integer(n) => Cell::Number(n as f64),
                    ValueRef::Real(f) if f.is_finite() => Cell::Number(f),
                    ValueRef::Real(_) => Cell::Null,
                    ValueRef::Text(bytes) => Cell::Text(String::from_utf8_lossy(bytes).into_owned()),
                });
            }
        }

        let columns = names
            .into_iter()
            .zip(values)
            .map(|(name, vals)| Column::new(name, vals))
            .collect();
        Table::new(columns)
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn csv_pads_short_rows_and_rejects_long_ones() {
        let t = Table::from_csv_str("a,b\n1\n2,x\n").expect("csv");
        assert_eq!(t.row_count(), 2);
        assert_eq!(t.require_column("b").unwrap().values[0], Cell::Null);

        let err = Table::from_csv_str("a,b\n1,2,3\n").unwrap_err();
        assert_eq!(err.code, "DATASET_INVALID");
    }

    #[test]
    fn sqlite_table_loads_typed_cells() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE "monthly sales" (month TEXT, units INTEGER, revenue REAL);
            INSERT INTO "monthly sales" VALUES ('March', 3, 120.5);
            INSERT INTO "monthly sales" VALUES ('April', NULL, 99.0);
            "#,
        )
        .unwrap();

        let t = Table::from_sqlite(&conn, "monthly sales").expect("load");
        assert_eq!(t.row_count(), 2);
        assert_eq!(t.column_names(), vec!["month", "units", "revenue"]);
        assert_eq!(t.require_column("units").unwrap().values, vec![Cell::Number(3.0), Cell::Null]);
        assert_eq!(
            t.require_column("month").unwrap().values[0],
            Cell::Text("March".to_string())
        );
    }

    #[test]
    fn sqlite_missing_table_is_load_error() {
        let conn = Connection::open_in_memory().unwrap();
        let err = Table::from_sqlite(&conn, "nope").unwrap_err();
        assert_eq!(err.code, "DATASET_LOAD_FAILED");
    }
}
