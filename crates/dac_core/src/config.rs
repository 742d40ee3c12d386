use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{codes, AppError};

pub const ENV_PREFIX: &str = "DAC_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub retrieval: RetrievalConfig,
    pub evidence: EvidenceConfig,
    pub prompt: PromptConfig,
    pub generation: GenerationConfig,
    pub analysis: AnalysisConfig,
    pub ingest: IngestConfig,
    pub ollama: OllamaConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub max_per_document: usize,
    pub candidate_multiplier: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_per_document: 2,
            candidate_multiplier: 4,
        }
    }
}

/// Score given to analysis evidence when it is merged with retrieved text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AnalysisPriority {
    Pinned,
    Scored { score: f64 },
}

impl AnalysisPriority {
    pub fn score(&self) -> f64 {
        match self {
            AnalysisPriority::Pinned => 1.0,
            AnalysisPriority::Scored { score } => *score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    AnalysisFirst,
    TextFirst,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    pub budget_chars: usize,
    pub analysis_priority: AnalysisPriority,
    pub tie_break: TieBreak,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            budget_chars: 6000,
            analysis_priority: AnalysisPriority::Pinned,
            tie_break: TieBreak::AnalysisFirst,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub max_chars: usize,
    pub default_template: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_chars: 12000,
            default_template: "rag_qa".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub attempt_timeout_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 250,
            max_backoff_ms: 4000,
            attempt_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub max_result_chars: usize,
    pub cache_ttl_seconds: u64,
    pub cache_max_entries: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_result_chars: 2000,
            cache_ttl_seconds: 300,
            cache_max_entries: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1000,
            chunk_overlap_chars: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub embedding_model: String,
    pub embedding_dims: usize,
    pub max_embed_input_chars: usize,
    pub generation_model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dims: 768,
            max_embed_input_chars: 8000,
            generation_model: "llama3.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Defaults, then the optional JSON file, then `DAC_<SECTION>__<FIELD>` variables from
    /// the process environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let file_json = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(AppError::new(codes::CONFIG_NOT_FOUND, "Config file not found")
                        .with_details(format!("path={}", p.display())));
                }
                let text = fs::read_to_string(p).map_err(|e| {
                    AppError::new(codes::CONFIG_INVALID, "Failed to read config file")
                        .with_details(format!("path={}; err={}", p.display(), e))
                })?;
                Some(text)
            }
            None => None,
        };
        Self::from_sources(file_json.as_deref(), std::env::vars())
    }

    pub fn from_sources<I>(file_json: Option<&str>, env: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut tree = serde_json::to_value(AppConfig::default()).map_err(|e| {
            AppError::new(codes::CONFIG_INVALID, "Failed to encode default config")
                .with_details(e.to_string())
        })?;

        if let Some(text) = file_json {
            let file: Value = serde_json::from_str(text).map_err(|e| {
                AppError::new(codes::CONFIG_INVALID, "Config file is not valid JSON")
                    .with_details(e.to_string())
            })?;
            if !file.is_object() {
                return Err(AppError::new(
                    codes::CONFIG_INVALID,
                    "Config file must contain a JSON object",
                ));
            }
            deep_merge(&mut tree, file);
        }

        let mut overrides: Vec<(String, String)> = env
            .into_iter()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        // Stable application order regardless of how the environment iterates.
        overrides.sort();
        for (key, raw) in overrides {
            let path: Vec<String> = key[ENV_PREFIX.len()..]
                .to_ascii_lowercase()
                .split("__")
                .map(|s| s.to_string())
                .collect();
            if !apply_env_override(&mut tree, &path, &raw) {
                tracing::warn!(env_key = %key, "ignoring environment override for unknown config key");
            }
        }

        let cfg: AppConfig = serde_json::from_value(tree).map_err(|e| {
            AppError::new(codes::CONFIG_INVALID, "Config does not match the expected shape")
                .with_details(e.to_string())
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let mut problems: Vec<String> = Vec::new();
        if self.retrieval.top_k == 0 {
            problems.push("retrieval.top_k must be >= 1".to_string());
        }
        if self.retrieval.max_per_document == 0 {
            problems.push("retrieval.max_per_document must be >= 1".to_string());
        }
        if self.retrieval.candidate_multiplier == 0 {
            problems.push("retrieval.candidate_multiplier must be >= 1".to_string());
        }
        if self.evidence.budget_chars == 0 {
            problems.push("evidence.budget_chars must be > 0".to_string());
        }
        if let AnalysisPriority::Scored { score } = self.evidence.analysis_priority {
            if !(0.0..=1.0).contains(&score) {
                problems.push("evidence.analysis_priority.score must be within [0, 1]".to_string());
            }
        }
        if self.prompt.max_chars == 0 {
            problems.push("prompt.max_chars must be > 0".to_string());
        }
        if self.generation.max_attempts == 0 {
            problems.push("generation.max_attempts must be >= 1".to_string());
        }
        if self.generation.base_backoff_ms > self.generation.max_backoff_ms {
            problems.push("generation.base_backoff_ms must not exceed max_backoff_ms".to_string());
        }
        if self.generation.attempt_timeout_ms == 0 {
            problems.push("generation.attempt_timeout_ms must be > 0".to_string());
        }
        if self.analysis.max_result_chars < 64 {
            problems.push("analysis.max_result_chars must be >= 64".to_string());
        }
        if self.ingest.chunk_max_chars == 0 {
            problems.push("ingest.chunk_max_chars must be > 0".to_string());
        }
        if self.ingest.chunk_overlap_chars >= self.ingest.chunk_max_chars {
            problems.push("ingest.chunk_overlap_chars must be smaller than chunk_max_chars".to_string());
        }
        if self.ollama.embedding_dims == 0 {
            problems.push("ollama.embedding_dims must be > 0".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(AppError::new(codes::CONFIG_INVALID, "Configuration is invalid")
                .with_details(problems.join("; ")))
        }
    }
}

fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(t), Value::Object(s)) => {
            for (k, v) in s {
                match t.get_mut(&k) {
                    Some(existing) if existing.is_object() && v.is_object() => deep_merge(existing, v),
                    _ => {
                        t.insert(k, v);
                    }
                }
            }
        }
        (t, s) => *t = s,
    }
}

/// Only the last path segment may be new (e.g. `score` of a scored priority). An existing leaf
/// decides how the raw string is typed, so a numeric-looking model name stays a string.
fn apply_env_override(tree: &mut Value, path: &[String], raw: &str) -> bool {
    let Some((leaf, parents)) = path.split_last() else {
        return false;
    };
    let mut cur = tree;
    for seg in parents {
        match cur.get_mut(seg.as_str()) {
            Some(next) => cur = next,
            None => return false,
        }
    }
    let Value::Object(map) = cur else {
        return false;
    };
    let Some(existing) = map.get_mut(leaf.as_str()) else {
        map.insert(leaf.clone(), guess_scalar(raw));
        return true;
    };
    let cur = existing;
    let typed = match cur {
        Value::Bool(_) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => Value::String(raw.to_string()),
        },
        Value::Number(_) => {
            if let Ok(i) = raw.parse::<u64>() {
                Value::from(i)
            } else if let Ok(f) = raw.parse::<f64>() {
                Value::from(f)
            } else {
                Value::String(raw.to_string())
            }
        }
        Value::Object(_) | Value::Array(_) => {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        }
        _ => Value::String(raw.to_string()),
    };
    *cur = typed;
    true
}

fn guess_scalar(raw: &str) -> Value {
    match raw.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = raw.parse::<u64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::from(f);
    }
    Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::from_sources(None, Vec::new()).expect("defaults");
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.ingest.chunk_max_chars, 1000);
        assert_eq!(cfg.ingest.chunk_overlap_chars, 200);
        assert_eq!(cfg.evidence.tie_break, TieBreak::AnalysisFirst);
    }

    #[test]
    fn file_then_env_override_nested_keys() {
        let file = r#"{"retrieval": {"top_k": 8}, "ollama": {"generation_model": "mistral"}}"#;
        let cfg = AppConfig::from_sources(
            Some(file),
            env(&[
                ("DAC_RETRIEVAL__MAX_PER_DOCUMENT", "3"),
                ("DAC_EVIDENCE__TIE_BREAK", "text_first"),
                ("DAC_EVIDENCE__ANALYSIS_PRIORITY__MODE", "scored"),
                ("DAC_EVIDENCE__ANALYSIS_PRIORITY__SCORE", "0.75"),
                ("DAC_LOGGING__JSON", "true"),
                ("DAC_OLLAMA__EMBEDDING_MODEL", "768"),
                ("PATH", "/usr/bin"),
            ]),
        )
        .expect("config");

        assert_eq!(cfg.retrieval.top_k, 8);
        assert_eq!(cfg.retrieval.max_per_document, 3);
        assert_eq!(cfg.evidence.tie_break, TieBreak::TextFirst);
        assert_eq!(cfg.evidence.analysis_priority, AnalysisPriority::Scored { score: 0.75 });
        assert!(cfg.logging.json);
        assert_eq!(cfg.ollama.generation_model, "mistral");
        assert_eq!(cfg.ollama.embedding_model, "768");
    }

    #[test]
    fn unknown_env_keys_are_ignored() {
        let cfg = AppConfig::from_sources(None, env(&[("DAC_NOPE__FIELD", "1")])).expect("config");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = AppConfig::from_sources(
            None,
            env(&[("DAC_RETRIEVAL__TOP_K", "0"), ("DAC_INGEST__CHUNK_OVERLAP_CHARS", "5000")]),
        )
        .unwrap_err();
        assert_eq!(err.code, "CONFIG_INVALID");
        let details = err.details.unwrap_or_default();
        assert!(details.contains("retrieval.top_k"));
        assert!(details.contains("chunk_overlap_chars"));
    }

    #[test]
    fn malformed_file_is_rejected() {
        let err = AppConfig::from_sources(Some("[1, 2]"), Vec::new()).unwrap_err();
        assert_eq!(err.code, "CONFIG_INVALID");
    }

    #[test]
    fn missing_file_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = AppConfig::load(Some(&tmp.path().join("missing.json"))).unwrap_err();
        assert_eq!(err.code, "CONFIG_NOT_FOUND");
    }
}
