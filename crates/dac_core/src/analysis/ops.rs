use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};

use super::stats;
use super::Params;
use crate::dataset::{Column, ColumnKind, Table};
use crate::error::{codes, AppError};

pub const TOP_VALUES_LIMIT: usize = 10;
pub const VALUE_COUNTS_DEFAULT_LIMIT: usize = 20;
const FLAT_TREND_R2: f64 = 0.1;

pub(crate) type OperationFn = fn(&Table, &Params) -> Result<Value, AppError>;

/// Public description of a registered operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationInfo {
    pub name: &'static str,
    pub version: u32,
    pub description: &'static str,
    pub parameters: &'static [&'static str],
}

pub(crate) struct Operation {
    pub info: OperationInfo,
    pub run: OperationFn,
}

pub(crate) const OPERATIONS: &[Operation] = &[
    Operation {
        info: OperationInfo {
            name: "summary_statistics",
            version: 1,
            description: "Count, missing, mean, median, min, max, std and skew for numeric columns; unique counts and top values for categorical ones",
            parameters: &["column", "columns", "where"],
        },
        run: summary_statistics,
    },
    Operation {
        info: OperationInfo {
            name: "correlation",
            version: 1,
            description: "Pearson correlation matrix over numeric columns using pairwise complete rows",
            parameters: &["columns", "where"],
        },
        run: correlation,
    },
    Operation {
        info: OperationInfo {
            name: "trend_detection",
            version: 1,
            description: "Least squares trend of a numeric column over row order or a numeric ordering column",
            parameters: &["column", "order_by", "where"],
        },
        run: trend_detection,
    },
    Operation {
        info: OperationInfo {
            name: "value_counts",
            version: 1,
            description: "Occurrences of each distinct value, most frequent first",
            parameters: &["column", "limit", "where"],
        },
        run: value_counts,
    },
    Operation {
        info: OperationInfo {
            name: "missing_values",
            version: 1,
            description: "Missing cell counts per column",
            parameters: &["where"],
        },
        run: missing_values,
    },
    Operation {
        info: OperationInfo {
            name: "dataset_overview",
            version: 1,
            description: "Row and column counts with per-column kinds",
            parameters: &[],
        },
        run: dataset_overview,
    },
];

pub(crate) fn find(name: &str) -> Option<&'static Operation> {
    OPERATIONS.iter().find(|op| op.info.name == name)
}

pub(crate) fn check_known_parameters(info: &OperationInfo, params: &Params) -> Result<(), AppError> {
    let unknown: Vec<&str> = params
        .keys()
        .map(|k| k.as_str())
        .filter(|k| !info.parameters.contains(k))
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(AppError::new(codes::INVALID_PARAMETERS, "Unknown parameters for operation")
            .with_details(format!(
                "operation={}; unknown={}; allowed={}",
                info.name,
                unknown.join(","),
                info.parameters.join(",")
            )))
    }
}

/// `where` as column -> scalar constraints; absent means no filter.
pub(crate) fn where_constraints(params: &Params) -> Result<BTreeMap<String, Value>, AppError> {
    match params.get("where") {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(Value::Object(map)) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        Some(other) => Err(AppError::new(codes::INVALID_PARAMETERS, "where must be an object")
            .with_details(format!("got={}", other))),
    }
}

fn param_str<'a>(params: &'a Params, key: &str) -> Result<Option<&'a str>, AppError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.as_str())),
        Some(other) => Err(AppError::new(codes::INVALID_PARAMETERS, "Parameter must be a non-empty string")
            .with_details(format!("param={}; got={}", key, other))),
    }
}

fn require_str<'a>(params: &'a Params, key: &str) -> Result<&'a str, AppError> {
    param_str(params, key)?.ok_or_else(|| {
        AppError::new(codes::INVALID_PARAMETERS, "Missing required parameter")
            .with_details(format!("param={}", key))
    })
}

fn param_str_list(params: &Params, key: &str) -> Result<Option<Vec<String>>, AppError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(s) if !s.trim().is_empty() => out.push(s.to_string()),
                    _ => {
                        return Err(AppError::new(
                            codes::INVALID_PARAMETERS,
                            "Parameter must be a list of column names",
                        )
                        .with_details(format!("param={}; got={}", key, item)))
                    }
                }
            }
            Ok(Some(out))
        }
        Some(other) => Err(AppError::new(codes::INVALID_PARAMETERS, "Parameter must be a list")
            .with_details(format!("param={}; got={}", key, other))),
    }
}

fn param_limit(params: &Params, key: &str, default: usize) -> Result<usize, AppError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => match v.as_u64() {
            Some(n) if n >= 1 => Ok(n as usize),
            _ => Err(AppError::new(codes::INVALID_PARAMETERS, "Parameter must be a positive integer")
                .with_details(format!("param={}; got={}", key, v))),
        },
    }
}

fn selected_columns<'t>(table: &'t Table, params: &Params) -> Result<Vec<&'t Column>, AppError> {
    match param_str_list(params, "columns")? {
        Some(names) => names.iter().map(|n| table.require_column(n)).collect(),
        None => Ok(table.columns().iter().collect()),
    }
}

#[derive(Debug, Clone, Serialize)]
struct ValueCount {
    value: String,
    count: usize,
}

/// Distinct values with counts, most frequent first; equal counts ordered by value.
fn counted_values(col: &Column) -> Vec<ValueCount> {
    let mut map: BTreeMap<String, usize> = BTreeMap::new();
    for key in col.values.iter().filter_map(|c| c.display_key()) {
        *map.entry(key).or_insert(0) += 1;
    }
    let mut items: Vec<ValueCount> = map
        .into_iter()
        .map(|(value, count)| ValueCount { value, count })
        .collect();
    items.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    items
}

fn column_stats(col: &Column) -> Value {
    let missing = col.missing_count();
    let count = col.values.len() - missing;
    match col.kind() {
        ColumnKind::Numeric => {
            let xs = col.numbers();
            json!({
                "kind": "numeric",
                "count": count,
                "missing": missing,
                "sum": stats::sum(&xs),
                "mean": stats::mean(&xs),
                "median": stats::median(&xs),
                "min": stats::min(&xs),
                "max": stats::max(&xs),
                "std": stats::std_dev(&xs),
                "skew": stats::skewness(&xs),
            })
        }
        ColumnKind::Categorical => {
            let counts = counted_values(col);
            let unique_count = counts.len();
            let top: Vec<ValueCount> = counts.into_iter().take(TOP_VALUES_LIMIT).collect();
            json!({
                "kind": "categorical",
                "count": count,
                "missing": missing,
                "unique_count": unique_count,
                "top_values": top,
            })
        }
        ColumnKind::Empty => json!({
            "kind": "empty",
            "count": 0,
            "missing": missing,
        }),
    }
}

pub(crate) fn summary_statistics(table: &Table, params: &Params) -> Result<Value, AppError> {
    if let Some(name) = param_str(params, "column")? {
        if params.get("columns").map(|v| !v.is_null()).unwrap_or(false) {
            return Err(AppError::new(
                codes::INVALID_PARAMETERS,
                "Use either column or columns, not both",
            ));
        }
        let col = table.require_column(name)?;
        let mut v = column_stats(col);
        if let Value::Object(map) = &mut v {
            map.insert("column".to_string(), json!(col.name));
            map.insert("row_count".to_string(), json!(table.row_count()));
        }
        return Ok(v);
    }

    let mut columns = serde_json::Map::new();
    for col in selected_columns(table, params)? {
        columns.insert(col.name.clone(), column_stats(col));
    }
    Ok(json!({
        "row_count": table.row_count(),
        "columns": Value::Object(columns),
    }))
}

pub(crate) fn correlation(table: &Table, params: &Params) -> Result<Value, AppError> {
    let cols: Vec<&Column> = match param_str_list(params, "columns")? {
        Some(names) => {
            let mut out = Vec::with_capacity(names.len());
            for n in &names {
                let c = table.require_column(n)?;
                if c.kind() != ColumnKind::Numeric {
                    return Err(AppError::new(codes::INVALID_PARAMETERS, "Correlation requires numeric columns")
                        .with_details(format!("column={}; kind={}", n, c.kind().as_str())));
                }
                out.push(c);
            }
            out
        }
        None => table
            .columns()
            .iter()
            .filter(|c| c.kind() == ColumnKind::Numeric)
            .collect(),
    };
    if cols.len() < 2 {
        return Err(AppError::new(
            codes::INVALID_PARAMETERS,
            "Correlation needs at least two numeric columns",
        )
        .with_details(format!("numeric_columns={}", cols.len())));
    }

    let names: Vec<&str> = cols.iter().map(|c| c.name.as_str()).collect();
    let mut matrix: Vec<Vec<Option<f64>>> = vec![vec![None; cols.len()]; cols.len()];
    let mut pairs: Vec<(String, String, Option<f64>, usize)> = Vec::new();

    for i in 0..cols.len() {
        for j in i..cols.len() {
            let (xs, ys) = complete_pairs(cols[i], cols[j]);
            let r = stats::pearson(&xs, &ys);
            matrix[i][j] = r;
            matrix[j][i] = r;
            if i != j {
                pairs.push((names[i].to_string(), names[j].to_string(), r, xs.len()));
            }
        }
    }

    // Strongest relationships first; undefined coefficients last.
    pairs.sort_by(|a, b| {
        let ka = a.2.map(f64::abs).unwrap_or(-1.0);
        let kb = b.2.map(f64::abs).unwrap_or(-1.0);
        kb.total_cmp(&ka)
            .then_with(|| a.0.cmp(&b.0))
            .then_with(|| a.1.cmp(&b.1))
    });

    let pairs_json: Vec<Value> = pairs
        .into_iter()
        .map(|(a, b, r, n)| json!({"a": a, "b": b, "r": r, "n": n}))
        .collect();

    Ok(json!({
        "method": "pearson",
        "columns": names,
        "matrix": matrix,
        "pairs": pairs_json,
    }))
}

fn complete_pairs(a: &Column, b: &Column) -> (Vec<f64>, Vec<f64>) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for (x, y) in a.values.iter().zip(&b.values) {
        if let (Some(x), Some(y)) = (x.as_number(), y.as_number()) {
            xs.push(x);
            ys.push(y);
        }
    }
    (xs, ys)
}

pub(crate) fn trend_detection(table: &Table, params: &Params) -> Result<Value, AppError> {
    let y_name = require_str(params, "column")?;
    let y_col = table.require_column(y_name)?;
    if y_col.kind() == ColumnKind::Categorical {
        return Err(AppError::new(codes::INVALID_PARAMETERS, "Trend detection requires a numeric column")
            .with_details(format!("column={}", y_name)));
    }

    let order_by = param_str(params, "order_by")?;
    let mut points: Vec<(f64, f64)> = match order_by {
        Some(x_name) => {
            let x_col = table.require_column(x_name)?;
            if x_col.kind() == ColumnKind::Categorical {
                return Err(AppError::new(codes::INVALID_PARAMETERS, "order_by must be a numeric column")
                    .with_details(format!("order_by={}", x_name)));
            }
            let (xs, ys) = complete_pairs(x_col, y_col);
            xs.into_iter().zip(ys).collect()
        }
        None => y_col
            .values
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_number().map(|y| (i as f64, y)))
            .collect(),
    };
    // Stable: equal x keeps row order.
    points.sort_by(|a, b| a.0.total_cmp(&b.0));

    let xs: Vec<f64> = points.iter().map(|p| p.0).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.1).collect();
    let fit = stats::linear_fit(&xs, &ys);

    let direction = match fit {
        None => "insufficient_data",
        Some(f) if f.slope == 0.0 || f.r2 < FLAT_TREND_R2 => "flat",
        Some(f) if f.slope > 0.0 => "increasing",
        Some(_) => "decreasing",
    };

    let (first_fitted, last_fitted) = match (fit, xs.first(), xs.last()) {
        (Some(f), Some(x0), Some(x1)) => (
            Some(f.intercept + f.slope * x0),
            Some(f.intercept + f.slope * x1),
        ),
        _ => (None, None),
    };
    let change_pct = match (first_fitted, last_fitted) {
        (Some(a), Some(b)) if a != 0.0 => Some((b - a) / a.abs() * 100.0),
        _ => None,
    };

    Ok(json!({
        "column": y_name,
        "order_by": order_by.unwrap_or("row_index"),
        "n": points.len(),
        "slope": fit.map(|f| f.slope),
        "intercept": fit.map(|f| f.intercept),
        "r2": fit.map(|f| f.r2),
        "direction": direction,
        "first_fitted": first_fitted,
        "last_fitted": last_fitted,
        "change_pct": change_pct,
    }))
}

pub(crate) fn value_counts(table: &Table, params: &Params) -> Result<Value, AppError> {
    let name = require_str(params, "column")?;
    let limit = param_limit(params, "limit", VALUE_COUNTS_DEFAULT_LIMIT)?;
    let col = table.require_column(name)?;
    let counts = counted_values(col);
    let distinct = counts.len();
    let missing = col.missing_count();
    let shown: Vec<ValueCount> = counts.into_iter().take(limit).collect();
    Ok(json!({
        "column": name,
        "total": col.values.len() - missing,
        "missing": missing,
        "distinct": distinct,
        "counts": shown,
    }))
}

pub(crate) fn missing_values(table: &Table, _params: &Params) -> Result<Value, AppError> {
    let rows = table.row_count();
    let mut columns = serde_json::Map::new();
    let mut total = 0usize;
    for col in table.columns() {
        let missing = col.missing_count();
        total += missing;
        let pct = if rows == 0 {
            0.0
        } else {
            missing as f64 / rows as f64 * 100.0
        };
        columns.insert(
            col.name.clone(),
            json!({"missing": missing, "missing_pct": pct}),
        );
    }
    Ok(json!({
        "row_count": rows,
        "total_missing": total,
        "columns": Value::Object(columns),
    }))
}

pub(crate) fn dataset_overview(table: &Table, _params: &Params) -> Result<Value, AppError> {
    let columns: Vec<Value> = table
        .columns()
        .iter()
        .map(|c| {
            json!({
                "name": c.name,
                "kind": c.kind().as_str(),
                "missing": c.missing_count(),
            })
        })
        .collect();
    Ok(json!({
        "row_count": table.row_count(),
        "column_count": table.columns().len(),
        "columns": columns,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table() -> Table {
        Table::from_csv_str(
            "month_idx,month,region,sales,units\n1,Jan,north,100,10\n2,Feb,north,110,11\n3,Mar,south,120,\n4,Apr,south,130,13\n",
        )
        .expect("csv")
    }

    fn params(v: Value) -> Params {
        match v {
            Value::Object(m) => m.into_iter().collect(),
            _ => Params::new(),
        }
    }

    #[test]
    fn registry_names_are_unique() {
        let mut names: Vec<&str> = OPERATIONS.iter().map(|o| o.info.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), OPERATIONS.len());
    }

    #[test]
    fn single_column_summary_is_flat() {
        let v = summary_statistics(&table(), &params(json!({"column": "sales"}))).unwrap();
        assert_eq!(v["kind"], json!("numeric"));
        assert_eq!(v["mean"], json!(115.0));
        assert_eq!(v["count"], json!(4));
        assert_eq!(v["column"], json!("sales"));
    }

    #[test]
    fn categorical_summary_has_top_values() {
        let v = summary_statistics(&table(), &params(json!({"column": "region"}))).unwrap();
        assert_eq!(v["unique_count"], json!(2));
        assert_eq!(
            v["top_values"],
            json!([{"value": "north", "count": 2}, {"value": "south", "count": 2}])
        );
    }

    #[test]
    fn correlation_uses_complete_rows() {
        let v = correlation(&table(), &params(json!({"columns": ["sales", "units"]}))).unwrap();
        assert_eq!(v["pairs"][0]["n"], json!(3));
        assert_eq!(v["columns"], json!(["sales", "units"]));

        let err = correlation(&table(), &params(json!({"columns": ["sales", "region"]}))).unwrap_err();
        assert_eq!(err.code, "ANALYSIS_INVALID_PARAMETERS");
    }

    #[test]
    fn trend_detects_direction() {
        let v = trend_detection(&table(), &params(json!({"column": "sales", "order_by": "month_idx"}))).unwrap();
        assert_eq!(v["direction"], json!("increasing"));
        assert_eq!(v["n"], json!(4));

        let err = trend_detection(&table(), &params(json!({}))).unwrap_err();
        assert_eq!(err.code, "ANALYSIS_INVALID_PARAMETERS");
    }

    #[test]
    fn value_counts_orders_by_count_then_value() {
        let t = Table::from_csv_str("c\nb\na\nb\nc\na\nb\n").unwrap();
        let v = value_counts(&t, &params(json!({"column": "c", "limit": 2}))).unwrap();
        assert_eq!(
            v["counts"],
            json!([{"value": "b", "count": 3}, {"value": "a", "count": 2}])
        );
        assert_eq!(v["distinct"], json!(3));
    }

    #[test]
    fn missing_values_counts_nulls() {
        let v = missing_values(&table(), &Params::new()).unwrap();
        assert_eq!(v["total_missing"], json!(1));
        assert_eq!(v["columns"]["units"]["missing"], json!(1));
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        let op = find("dataset_overview").unwrap();
        let err = check_known_parameters(&op.info, &params(json!({"column": "x"}))).unwrap_err();
        assert_eq!(err.code, "ANALYSIS_INVALID_PARAMETERS");
    }
}
