use std::time::Duration;

use async_trait::async_trait;
use dac_core::error::AppError;

use crate::prompt::PromptRequest;

pub mod ollama_llm;

pub use ollama_llm::OllamaLlm;

/// A text-generation backend. Implementations return the raw completion; retry, timeout
/// enforcement across attempts and answer validation live in the generation orchestrator.
///
/// Errors should set `retryable` for transient conditions (timeouts, rate limits, an
/// unreachable runtime) so the orchestrator can tell them apart from fatal ones.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &PromptRequest, timeout: Duration) -> Result<String, AppError>;

    /// Whether the backend can serve requests right now. Backends without a cheap check
    /// report ready.
    async fn health(&self) -> Result<(), AppError> {
        Ok(())
    }
}
