use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::cache::{analysis_cache_key, AnalysisCache};
use crate::canonical::{canonical_json_string, canonicalize_json_value, sha256_hex};
use crate::config::AnalysisConfig;
use crate::dataset::{DatasetProvider, DatasetRef};
use crate::error::{codes, AppError};

mod ops;
pub mod stats;
mod summarize;

pub use ops::{OperationInfo, TOP_VALUES_LIMIT, VALUE_COUNTS_DEFAULT_LIMIT};

/// Operation parameters. A sorted map so the canonical form is independent of insertion order.
pub type Params = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub operation_name: String,
    #[serde(default)]
    pub parameters: Params,
}

impl AnalysisRequest {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            parameters: Params::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub operation_name: String,
    pub operation_version: u32,
    pub dataset_ref: DatasetRef,
    pub dataset_fingerprint: String,
    pub parameters: Params,
    pub value: Value,
    pub truncated: bool,
    pub computed_at: String,
}

impl AnalysisResult {
    /// Content digest over everything except `computed_at`.
    pub fn digest(&self) -> String {
        let body = json!({
            "operation_name": self.operation_name,
            "operation_version": self.operation_version,
            "dataset_ref": self.dataset_ref,
            "dataset_fingerprint": self.dataset_fingerprint,
            "parameters": self.parameters,
            "value": self.value,
            "truncated": self.truncated,
        });
        let canon = canonicalize_json_value(&body);
        sha256_hex(canon.to_string().as_bytes())
    }

    pub fn to_canonical_json(&self) -> Result<String, AppError> {
        let v = serde_json::to_value(self).map_err(|e| {
            AppError::new(codes::ANALYSIS_FAILED, "Failed to encode analysis result").with_details(e.to_string())
        })?;
        canonical_json_string(&v)
    }
}

/// A result plus the value before the size ceiling was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRun {
    pub result: AnalysisResult,
    pub full_value: Value,
}

pub trait Clock: Send + Sync {
    fn now_rfc3339(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_rfc3339(&self) -> String {
        OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
    }
}

#[derive(Debug, Clone)]
pub struct FixedClock(pub String);

impl Clock for FixedClock {
    fn now_rfc3339(&self) -> String {
        self.0.clone()
    }
}

pub struct AnalysisEngine {
    datasets: Arc<dyn DatasetProvider>,
    clock: Arc<dyn Clock>,
    cache: Option<Arc<AnalysisCache>>,
    max_result_chars: usize,
}

impl AnalysisEngine {
    pub fn new(datasets: Arc<dyn DatasetProvider>, cfg: &AnalysisConfig) -> Self {
        Self {
            datasets,
            clock: Arc::new(SystemClock),
            cache: Some(Arc::new(AnalysisCache::new(
                cfg.cache_ttl_seconds,
                cfg.cache_max_entries,
            ))),
            max_result_chars: cfg.max_result_chars,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cache(mut self, cache: Option<Arc<AnalysisCache>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn operations() -> Vec<OperationInfo> {
        ops::OPERATIONS.iter().map(|op| op.info.clone()).collect()
    }

    pub fn run(
        &self,
        operation_name: &str,
        dataset_ref: &DatasetRef,
        parameters: &Params,
    ) -> Result<AnalysisResult, AppError> {
        self.run_detailed(operation_name, dataset_ref, parameters)
            .map(|run| run.result)
    }

    pub fn run_request(
        &self,
        dataset_ref: &DatasetRef,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResult, AppError> {
        self.run(&request.operation_name, dataset_ref, &request.parameters)
    }

    /// Same as `run`, also returning the full value for callers that render it elsewhere.
    pub fn run_detailed(
        &self,
        operation_name: &str,
        dataset_ref: &DatasetRef,
        parameters: &Params,
    ) -> Result<AnalysisRun, AppError> {
        let op = ops::find(operation_name).ok_or_else(|| {
            AppError::new(codes::UNSUPPORTED_OPERATION, "Unsupported analysis operation")
                .with_details(format!(
                    "operation={}; supported={}",
                    operation_name,
                    ops::OPERATIONS
                        .iter()
                        .map(|o| o.info.name)
                        .collect::<Vec<_>>()
                        .join(",")
                ))
        })?;
        ops::check_known_parameters(&op.info, parameters)?;

        let params: Params = parameters
            .iter()
            .map(|(k, v)| (k.clone(), canonicalize_json_value(v)))
            .collect();
        let table = self.datasets.resolve(dataset_ref)?;

        let key = analysis_cache_key(
            op.info.name,
            op.info.version,
            dataset_ref,
            table.fingerprint(),
            &params,
        )?;
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&key) {
                tracing::debug!(
                    operation = op.info.name,
                    dataset = %dataset_ref,
                    "analysis cache hit"
                );
                return Ok(hit);
            }
        }

        let constraints = ops::where_constraints(&params)?;
        let filtered = table.filter_rows(&constraints)?;
        let raw = (op.run)(&filtered, &params)?;
        let full_value = canonicalize_json_value(&raw);
        let (value, truncated) = summarize::bound_value(&full_value, self.max_result_chars);

        let run = AnalysisRun {
            result: AnalysisResult {
                operation_name: op.info.name.to_string(),
                operation_version: op.info.version,
                dataset_ref: dataset_ref.clone(),
                dataset_fingerprint: table.fingerprint().to_string(),
                parameters: params,
                value,
                truncated,
                computed_at: self.clock.now_rfc3339(),
            },
            full_value,
        };

        tracing::info!(
            operation = op.info.name,
            version = op.info.version,
            dataset = %dataset_ref,
            rows = filtered.row_count(),
            truncated,
            "analysis computed"
        );

        if let Some(cache) = &self.cache {
            cache.put(key, run.clone());
        }
        Ok(run)
    }
}
