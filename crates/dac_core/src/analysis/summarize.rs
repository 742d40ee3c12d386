use serde_json::{json, Value};

const OMITTED_KEY: &str = "_omitted";
const MAX_LISTED_KEYS: usize = 16;

fn encoded_len(v: &Value) -> usize {
    serde_json::to_string(v).map(|s| s.chars().count()).unwrap_or(usize::MAX)
}

fn widest_container(v: &Value) -> usize {
    match v {
        Value::Array(items) => items.len().max(items.iter().map(widest_container).max().unwrap_or(0)),
        Value::Object(map) => map.len().max(map.values().map(widest_container).max().unwrap_or(0)),
        _ => 0,
    }
}

/// Keeps at most `keep` entries in every array and object (objects keep their first keys in
/// sorted order and record how many were dropped).
fn shrink(v: &Value, keep: usize) -> Value {
    match v {
        Value::Array(items) => Value::Array(items.iter().take(keep).map(|i| shrink(i, keep)).collect()),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, child) in map.iter().take(keep) {
                out.insert(k.clone(), shrink(child, keep));
            }
            if map.len() > keep {
                out.insert(OMITTED_KEY.to_string(), json!(map.len() - keep));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Returns the value unchanged when its compact JSON fits `max_chars`, otherwise the largest
/// deterministic shrink that fits, flagged as truncated. `value` must already be canonical.
pub(crate) fn bound_value(value: &Value, max_chars: usize) -> (Value, bool) {
    if encoded_len(value) <= max_chars {
        return (value.clone(), false);
    }

    let mut keep = widest_container(value);
    while keep > 1 {
        keep /= 2;
        let candidate = shrink(value, keep.max(1));
        if encoded_len(&candidate) <= max_chars {
            return (candidate, true);
        }
    }

    let keys: Vec<String> = match value {
        Value::Object(map) => map.keys().take(MAX_LISTED_KEYS).cloned().collect(),
        _ => Vec::new(),
    };
    let fallback = json!({
        "_truncated": true,
        "_note": "result exceeds the size ceiling; use the detailed run for the full value",
        "keys": keys,
    });
    if encoded_len(&fallback) <= max_chars {
        (fallback, true)
    } else {
        (json!({"_truncated": true}), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn small_values_pass_through() {
        let v = json!({"a": 1, "b": [1, 2, 3]});
        assert_eq!(bound_value(&v, 1000), (v.clone(), false));
    }

    #[test]
    fn large_arrays_are_shortened_deterministically() {
        let v = json!({"counts": (0..500).collect::<Vec<u32>>(), "column": "x"});
        let (a, ta) = bound_value(&v, 200);
        let (b, tb) = bound_value(&v, 200);
        assert!(ta && tb);
        assert_eq!(a, b);
        assert!(serde_json::to_string(&a).unwrap().len() <= 200);
        assert_eq!(a["column"], json!("x"));
    }

    #[test]
    fn wide_objects_record_omitted_keys() {
        let mut map = serde_json::Map::new();
        for i in 0..100 {
            map.insert(format!("col_{:03}", i), json!({"missing": i}));
        }
        let (v, truncated) = bound_value(&Value::Object(map), 400);
        assert!(truncated);
        assert!(v[OMITTED_KEY].as_u64().unwrap() > 0);
    }
}
