use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Single structured error shape used across the analysis and generation layers
/// and handed unchanged to whatever API surface sits in front of the core.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("[{code}] {message}")]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }
}

pub mod codes {
    // Embedding / retrieval / store
    pub const EMBEDDING_FAILED: &str = "AI_EMBEDDING_FAILED";
    pub const RETRIEVAL_FAILED: &str = "AI_RETRIEVAL_FAILED";
    pub const STORE_INVALID_DOCUMENT: &str = "AI_STORE_INVALID_DOCUMENT";
    pub const STORE_DIMS_MISMATCH: &str = "AI_STORE_DIMS_MISMATCH";
    pub const STORE_CHUNK_ID_CONFLICT: &str = "AI_STORE_CHUNK_ID_CONFLICT";
    pub const STORE_IO_FAILED: &str = "AI_STORE_IO_FAILED";
    pub const STORE_NOT_FOUND: &str = "AI_STORE_NOT_FOUND";
    pub const STORE_UNSUPPORTED_FILE: &str = "AI_STORE_UNSUPPORTED_FILE";

    // Local model runtime
    pub const OLLAMA_REMOTE_NOT_ALLOWED: &str = "AI_OLLAMA_REMOTE_NOT_ALLOWED";
    pub const OLLAMA_UNREACHABLE: &str = "AI_OLLAMA_UNREACHABLE";
    pub const OLLAMA_UNHEALTHY: &str = "AI_OLLAMA_UNHEALTHY";
    pub const LLM_REQUEST_FAILED: &str = "AI_LLM_REQUEST_FAILED";
    pub const LLM_RATE_LIMITED: &str = "AI_LLM_RATE_LIMITED";
    pub const LLM_TIMEOUT: &str = "AI_LLM_TIMEOUT";

    // Analysis / datasets
    pub const UNSUPPORTED_OPERATION: &str = "ANALYSIS_UNSUPPORTED_OPERATION";
    pub const INVALID_PARAMETERS: &str = "ANALYSIS_INVALID_PARAMETERS";
    pub const ANALYSIS_FAILED: &str = "ANALYSIS_FAILED";
    pub const DATASET_NOT_FOUND: &str = "DATASET_NOT_FOUND";
    pub const DATASET_INVALID: &str = "DATASET_INVALID";
    pub const DATASET_LOAD_FAILED: &str = "DATASET_LOAD_FAILED";

    // Prompting / generation
    pub const TEMPLATE_NOT_FOUND: &str = "PROMPT_TEMPLATE_NOT_FOUND";
    pub const GENERATION_TRANSIENT: &str = "GENERATION_TRANSIENT";
    pub const GENERATION_FATAL: &str = "GENERATION_FATAL";
    pub const GENERATION_CANCELLED: &str = "GENERATION_CANCELLED";
    pub const PIPELINE_ALL_BRANCHES_FAILED: &str = "PIPELINE_ALL_BRANCHES_FAILED";
    pub const INTERNAL_TASK_FAILED: &str = "INTERNAL_TASK_FAILED";

    // Answer notes (never raised as errors)
    pub const ANSWER_EMPTY: &str = "ANSWER_EMPTY";
    pub const ANSWER_MISSING_CITATIONS: &str = "ANSWER_MISSING_CITATIONS";
    pub const ANSWER_CITED_UNKNOWN_EVIDENCE: &str = "ANSWER_CITED_UNKNOWN_EVIDENCE";
    pub const ANSWER_UNGROUNDED: &str = "ANSWER_UNGROUNDED";
    pub const RETRIEVAL_DEGRADED: &str = "RETRIEVAL_DEGRADED";
    pub const ANALYSIS_DEGRADED: &str = "ANALYSIS_DEGRADED";
    pub const EVIDENCE_BUDGET_DROPPED: &str = "EVIDENCE_BUDGET_DROPPED";

    // Configuration
    pub const CONFIG_NOT_FOUND: &str = "CONFIG_NOT_FOUND";
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";
}
