use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::AppError;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// Rounds to 12 significant digits. Non-finite values have no JSON form and map to `None`.
pub fn round_significant(x: f64) -> Option<f64> {
    if !x.is_finite() {
        return None;
    }
    if x == 0.0 {
        return Some(0.0);
    }
    format!("{:.11e}", x).parse::<f64>().ok()
}

/// JSON number for a float, rounded; `null` when the float is not finite.
pub fn float_value(x: f64) -> Value {
    round_significant(x)
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

pub fn opt_float_value(x: Option<f64>) -> Value {
    x.map(float_value).unwrap_or(Value::Null)
}

/// Sorted object keys at every depth; floats rounded. Integers pass through untouched.
pub fn canonicalize_json_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                out.insert(k.clone(), canonicalize_json_value(&map[k]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize_json_value).collect()),
        Value::Number(n) if n.is_f64() => n.as_f64().map(float_value).unwrap_or(Value::Null),
        other => other.clone(),
    }
}

pub fn canonical_json_string(v: &Value) -> Result<String, AppError> {
    let canon = canonicalize_json_value(v);
    serde_json::to_string(&canon).map_err(|e| {
        AppError::new("CANONICAL_JSON_FAILED", "Failed to canonicalize JSON").with_details(e.to_string())
    })
}
