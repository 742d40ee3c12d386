//! Memoization for analysis runs.
//!
//! Keys are content hashes over (operation, version, dataset ref, dataset fingerprint,
//! canonical parameters), so a replaced dataset can never serve a stale entry; the TTL only bounds
//! memory held by results nobody asks for again.
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use serde_json::json;

use crate::analysis::{AnalysisRun, Params};
use crate::canonical::{canonical_json_string, sha256_hex};
use crate::dataset::DatasetRef;
use crate::error::AppError;

struct CachedRun {
    run: AnalysisRun,
    stored_at: SystemTime,
}

pub struct AnalysisCache {
    entries: Mutex<HashMap<String, CachedRun>>,
    ttl_seconds: u64,
    max_entries: usize,
}

impl AnalysisCache {
    pub fn new(ttl_seconds: u64, max_entries: usize) -> Self {
        AnalysisCache {
            entries: Mutex::new(HashMap::new()),
            ttl_seconds,
            max_entries: max_entries.max(1),
        }
    }

    fn is_fresh(&self, cached: &CachedRun, now: SystemTime) -> bool {
        let age = now
            .duration_since(cached.stored_at)
            .unwrap_or(Duration::from_secs(self.ttl_seconds + 1));
        age.as_secs() < self.ttl_seconds
    }

    pub fn get(&self, key: &str) -> Option<AnalysisRun> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let cached = entries.get(key)?;
        if self.is_fresh(cached, SystemTime::now()) {
            Some(cached.run.clone())
        } else {
            None
        }
    }

    pub fn put(&self, key: String, run: AnalysisRun) {
        let now = SystemTime::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, c| self.is_fresh(c, now));
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            // Evict the oldest entry; equal timestamps fall back to key order.
            let oldest = entries
                .iter()
                .min_by(|a, b| a.1.stored_at.cmp(&b.1.stored_at).then_with(|| a.0.cmp(b.0)))
                .map(|(k, _)| k.clone());
            if let Some(k) = oldest {
                entries.remove(&k);
            }
        }
        entries.insert(
            key,
            CachedRun {
                run,
                stored_at: now,
            },
        );
    }

    pub fn invalidate_all(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            max_entries: self.max_entries,
            ttl_seconds: self.ttl_seconds,
        }
    }
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::new(300, 256)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub ttl_seconds: u64,
}

/// Results carry their `dataset_ref`, so two refs holding identical content must not
/// share an entry.
pub fn analysis_cache_key(
    operation_name: &str,
    operation_version: u32,
    dataset_ref: &DatasetRef,
    dataset_fingerprint: &str,
    params: &Params,
) -> Result<String, AppError> {
    let params_canon = canonical_json_string(&json!(params))?;
    let ref_name = dataset_ref.as_str();
    let input = format!(
        "v2|{}|{}|{}:{}|{}|{}",
        operation_name,
        operation_version,
        ref_name.len(),
        ref_name,
        dataset_fingerprint,
        params_canon
    );
    Ok(sha256_hex(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisResult;
    use std::thread;

    fn run(op: &str) -> AnalysisRun {
        AnalysisRun {
            result: AnalysisResult {
                operation_name: op.to_string(),
                operation_version: 1,
                dataset_ref: DatasetRef::new("sales"),
                dataset_fingerprint: "fp".to_string(),
                parameters: Params::new(),
                value: json!({"row_count": 3}),
                truncated: false,
                computed_at: "2026-01-01T00:00:00Z".to_string(),
            },
            full_value: json!({"row_count": 3}),
        }
    }

    #[test]
    fn test_cache_hit() {
        let cache = AnalysisCache::default();
        cache.put("k1".to_string(), run("dataset_overview"));
        let hit = cache.get("k1");
        assert!(hit.is_some());
        assert_eq!(hit.unwrap().result.operation_name, "dataset_overview");
        assert!(cache.get("k2").is_none());
    }

    #[test]
    fn test_cache_expiration() {
        let cache = AnalysisCache::new(1, 8);
        cache.put("k1".to_string(), run("dataset_overview"));
        assert!(cache.get("k1").is_some());

        thread::sleep(Duration::from_millis(1100));

        assert!(cache.get("k1").is_none());
    }

    #[test]
    fn test_cache_evicts_when_full() {
        let cache = AnalysisCache::new(300, 2);
        cache.put("a".to_string(), run("one"));
        thread::sleep(Duration::from_millis(5));
        cache.put("b".to_string(), run("two"));
        thread::sleep(Duration::from_millis(5));
        cache.put("c".to_string(), run("three"));

        assert_eq!(cache.stats().entries, 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_cache_invalidate_all() {
        let cache = AnalysisCache::default();
        cache.put("k1".to_string(), run("dataset_overview"));
        cache.invalidate_all();
        assert!(cache.get("k1").is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn key_depends_on_every_input() {
        let mut p = Params::new();
        p.insert("column".to_string(), json!("sales"));
        let sales = DatasetRef::new("sales");
        let base = analysis_cache_key("summary_statistics", 1, &sales, "fp", &p).unwrap();
        assert_eq!(base, analysis_cache_key("summary_statistics", 1, &sales, "fp", &p).unwrap());
        assert_ne!(base, analysis_cache_key("summary_statistics", 2, &sales, "fp", &p).unwrap());
        assert_ne!(
            base,
            analysis_cache_key("summary_statistics", 1, &DatasetRef::new("sales_copy"), "fp", &p).unwrap()
        );
        assert_ne!(base, analysis_cache_key("summary_statistics", 1, &sales, "fp2", &p).unwrap());
        assert_ne!(base, analysis_cache_key("summary_statistics", 1, &sales, "fp", &Params::new()).unwrap());
    }
}
