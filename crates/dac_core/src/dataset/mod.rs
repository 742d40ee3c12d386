use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::sha256_hex;
use crate::error::{codes, AppError};

mod load;

pub use load::quote_identifier;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetRef(pub String);

impl DatasetRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Number(f64),
    Text(String),
}

impl Cell {
    /// Parses a raw text field the way the CSV loader sees it: blank and NA markers are null,
    /// finite numbers are numbers, anything else is text.
    pub fn parse(raw: &str) -> Self {
        let t = raw.trim();
        if t.is_empty() {
            return Cell::Null;
        }
        match t.to_ascii_lowercase().as_str() {
            "na" | "n/a" | "nan" | "null" | "none" => return Cell::Null,
            _ => {}
        }
        match t.parse::<f64>() {
            Ok(v) if v.is_finite() => Cell::Number(v),
            _ => Cell::Text(t.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Text form used for grouping and display; integral floats print without a fraction.
    pub fn display_key(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Number(v) => Some(format_number(*v)),
            Cell::Text(s) => Some(s.clone()),
        }
    }

    /// Equality against a JSON scalar from a `where` constraint.
    pub fn matches(&self, expected: &Value) -> bool {
        match (self, expected) {
            (Cell::Null, Value::Null) => true,
            (Cell::Number(a), Value::Number(b)) => b.as_f64().map(|b| *a == b).unwrap_or(false),
            (Cell::Number(a), Value::String(s)) => s.trim().parse::<f64>().map(|b| *a == b).unwrap_or(false),
            (Cell::Text(a), Value::String(b)) => a == b,
            (Cell::Text(a), Value::Bool(b)) => a.eq_ignore_ascii_case(if *b { "true" } else { "false" }),
            (Cell::Text(a), Value::Number(b)) => a == &b.to_string(),
            _ => false,
        }
    }

    fn fingerprint_token(&self) -> String {
        match self {
            Cell::Null => "0".to_string(),
            Cell::Number(v) => format!("n:{:016x}", v.to_bits()),
            Cell::Text(s) => format!("t:{}:{}", s.len(), s),
        }
    }
}

pub fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Categorical,
    Empty,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Numeric => "numeric",
            ColumnKind::Categorical => "categorical",
            ColumnKind::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Cell>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Any text cell makes the column categorical.
    pub fn kind(&self) -> ColumnKind {
        let mut saw_number = false;
        for c in &self.values {
            match c {
                Cell::Text(_) => return ColumnKind::Categorical,
                Cell::Number(_) => saw_number = true,
                Cell::Null => {}
            }
        }
        if saw_number {
            ColumnKind::Numeric
        } else {
            ColumnKind::Empty
        }
    }

    pub fn numbers(&self) -> Vec<f64> {
        self.values.iter().filter_map(Cell::as_number).collect()
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|c| c.is_null()).count()
    }
}

/// Column-oriented table. Immutable once built; the fingerprint identifies its exact content.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    row_count: usize,
    fingerprint: String,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self, AppError> {
        let row_count = columns.first().map(|c| c.values.len()).unwrap_or(0);
        let mut seen: BTreeMap<&str, ()> = BTreeMap::new();
        for c in &columns {
            if c.name.trim().is_empty() {
                return Err(AppError::new(codes::DATASET_INVALID, "Column name is empty"));
            }
            if seen.insert(c.name.as_str(), ()).is_some() {
                return Err(AppError::new(codes::DATASET_INVALID, "Duplicate column name")
                    .with_details(format!("column={}", c.name)));
            }
            if c.values.len() != row_count {
                return Err(AppError::new(codes::DATASET_INVALID, "Columns have different lengths")
                    .with_details(format!(
                        "column={}; len={}; expected={}",
                        c.name,
                        c.values.len(),
                        row_count
                    )));
            }
        }
        let fingerprint = fingerprint_columns(&columns);
        Ok(Self {
            columns,
            row_count,
            fingerprint,
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn require_column(&self, name: &str) -> Result<&Column, AppError> {
        self.column(name).ok_or_else(|| {
            AppError::new(codes::INVALID_PARAMETERS, "Unknown column")
                .with_details(format!("column={}; available={}", name, self.column_names().join(",")))
        })
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Keeps rows where every constraint column equals its JSON scalar. Unknown columns and
    /// non-scalar constraint values are parameter errors.
    pub fn filter_rows(&self, constraints: &BTreeMap<String, Value>) -> Result<Table, AppError> {
        if constraints.is_empty() {
            return Ok(self.clone());
        }
        let mut checks: Vec<(&Column, &Value)> = Vec::new();
        for (name, expected) in constraints {
            if expected.is_object() || expected.is_array() {
                return Err(AppError::new(
                    codes::INVALID_PARAMETERS,
                    "where constraints must be scalar values",
                )
                .with_details(format!("column={}", name)));
            }
            checks.push((self.require_column(name)?, expected));
        }

        let keep: Vec<usize> = (0..self.row_count)
            .filter(|&row| checks.iter().all(|(col, exp)| col.values[row].matches(exp)))
            .collect();

        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                values: keep.iter().map(|&row| c.values[row].clone()).collect(),
            })
            .collect();
        Table::new(columns)
    }
}

fn fingerprint_columns(columns: &[Column]) -> String {
    let mut buf = String::new();
    for c in columns {
        buf.push_str(&format!("col={}:{}\n", c.name.len(), c.name));
        for v in &c.values {
            buf.push_str(&v.fingerprint_token());
            buf.push('\n');
        }
    }
    sha256_hex(buf.as_bytes())
}

/// Read-only access to datasets by reference. Implementations must be cheap to call per query.
pub trait DatasetProvider: Send + Sync {
    fn resolve(&self, dataset_ref: &DatasetRef) -> Result<Arc<Table>, AppError>;
}

/// In-process catalog. Registering under an existing ref replaces the table wholesale.
#[derive(Debug, Default)]
pub struct InMemoryDatasets {
    tables: RwLock<BTreeMap<DatasetRef, Arc<Table>>>,
}

impl InMemoryDatasets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, dataset_ref: DatasetRef, table: Table) -> Option<Arc<Table>> {
        tracing::info!(
            dataset = %dataset_ref,
            rows = table.row_count(),
            columns = table.columns().len(),
            fingerprint = %table.fingerprint(),
            "dataset registered"
        );
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(dataset_ref, Arc::new(table))
    }

    pub fn remove(&self, dataset_ref: &DatasetRef) -> Option<Arc<Table>> {
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(dataset_ref)
    }

    pub fn list(&self) -> Vec<DatasetRef> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl DatasetProvider for InMemoryDatasets {
    fn resolve(&self, dataset_ref: &DatasetRef) -> Result<Arc<Table>, AppError> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(dataset_ref)
            .cloned()
            .ok_or_else(|| {
                AppError::new(codes::DATASET_NOT_FOUND, "Dataset not found")
                    .with_details(format!("dataset_ref={}", dataset_ref))
            })
    }
}
