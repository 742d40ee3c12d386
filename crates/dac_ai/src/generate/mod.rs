use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dac_core::config::GenerationConfig;
use dac_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::llm::LlmClient;
use crate::prompt::PromptRequest;

mod citations;

pub use citations::extract_cited_evidence_ids;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub attempt_timeout: Duration,
}

impl From<&GenerationConfig> for RetryPolicy {
    fn from(cfg: &GenerationConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            base_backoff: Duration::from_millis(cfg.base_backoff_ms),
            max_backoff: Duration::from_millis(cfg.max_backoff_ms),
            attempt_timeout: Duration::from_millis(cfg.attempt_timeout_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&GenerationConfig::default())
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.base_backoff
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerNote {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl AnswerNote {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub used_evidence_ids: BTreeSet<String>,
    pub cited_evidence_ids: BTreeSet<String>,
    pub status: AnswerStatus,
    pub grounded: bool,
    pub notes: Vec<AnswerNote>,
    pub error: Option<AppError>,
    pub attempts: u32,
}

impl Answer {
    pub fn failed(error: AppError, attempts: u32) -> Self {
        Self {
            text: String::new(),
            used_evidence_ids: BTreeSet::new(),
            cited_evidence_ids: BTreeSet::new(),
            status: AnswerStatus::Failed,
            grounded: false,
            notes: Vec::new(),
            error: Some(error),
            attempts,
        }
    }

    pub fn has_note(&self, code: &str) -> bool {
        self.notes.iter().any(|n| n.code == code)
    }

    /// Success becomes partial; partial and failed are left alone.
    pub fn downgrade(&mut self) {
        if self.status == AnswerStatus::Success {
            self.status = AnswerStatus::Partial;
        }
    }
}

pub struct GenerationOrchestrator {
    client: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

enum AttemptOutcome {
    Text(String),
    Failed(AppError),
    Cancelled,
}

impl GenerationOrchestrator {
    pub fn new(client: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Asks the model backend whether it can serve requests.
    pub async fn ready(&self) -> Result<(), AppError> {
        self.client.health().await.map_err(|e| {
            tracing::warn!(client = self.client.name(), code = %e.code, "model backend not ready");
            e
        })
    }

    async fn attempt(&self, request: &PromptRequest, cancel: &CancellationToken) -> AttemptOutcome {
        let timeout = self.policy.attempt_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => AttemptOutcome::Cancelled,
            r = tokio::time::timeout(timeout, self.client.complete(request, timeout)) => match r {
                Ok(Ok(text)) => AttemptOutcome::Text(text),
                Ok(Err(e)) => AttemptOutcome::Failed(e),
                Err(_) => AttemptOutcome::Failed(
                    AppError::new(codes::LLM_TIMEOUT, "Model call timed out")
                        .with_details(format!("timeout_ms={}", timeout.as_millis()))
                        .with_retryable(true),
                ),
            },
        }
    }

    /// Runs the request against the model with retries. Never returns an error: failures
    /// come back as `AnswerStatus::Failed` with the cause in `error`.
    pub async fn generate(&self, request: &PromptRequest, cancel: &CancellationToken) -> Answer {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match self.attempt(request, cancel).await {
                AttemptOutcome::Text(text) => return self.finish(request, text, attempt),
                AttemptOutcome::Cancelled => return cancelled(attempt),
                AttemptOutcome::Failed(e) => e,
            };

            if !err.retryable {
                tracing::warn!(client = self.client.name(), attempt, code = %err.code, "generation failed");
                return Answer::failed(wrap(codes::GENERATION_FATAL, "Model call failed", &err), attempt);
            }
            if attempt >= max_attempts {
                tracing::warn!(client = self.client.name(), attempt, code = %err.code, "generation retries exhausted");
                return Answer::failed(
                    wrap(codes::GENERATION_TRANSIENT, "Model call failed after retries", &err).with_retryable(true),
                    attempt,
                );
            }

            let backoff = self.policy.backoff_for(attempt);
            tracing::info!(
                client = self.client.name(),
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                code = %err.code,
                "retrying model call"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled(attempt),
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    fn finish(&self, request: &PromptRequest, text: String, attempts: u32) -> Answer {
        let presented = request.evidence_ids();
        let cited = extract_cited_evidence_ids(&text);
        let unknown: Vec<&String> = cited.difference(&presented).collect();
        let known: BTreeSet<String> = cited.intersection(&presented).cloned().collect();

        let mut notes = Vec::new();
        let mut status = AnswerStatus::Success;
        let mut grounded = true;

        if text.trim().is_empty() {
            notes.push(AnswerNote::new(codes::ANSWER_EMPTY, "Model returned an empty answer"));
            status = AnswerStatus::Partial;
            grounded = false;
        }
        if !unknown.is_empty() {
            let listed: Vec<&str> = unknown.iter().map(|s| s.as_str()).collect();
            notes.push(
                AnswerNote::new(codes::ANSWER_CITED_UNKNOWN_EVIDENCE, "Answer cited evidence that was not presented")
                    .with_details(format!("ids={}", listed.join(","))),
            );
            status = AnswerStatus::Partial;
        }
        if presented.is_empty() {
            notes.push(AnswerNote::new(codes::ANSWER_UNGROUNDED, "No evidence was available for this answer"));
            status = AnswerStatus::Partial;
            grounded = false;
        } else if known.is_empty() && !text.trim().is_empty() {
            notes.push(AnswerNote::new(codes::ANSWER_MISSING_CITATIONS, "Answer does not cite any presented evidence"));
            status = AnswerStatus::Partial;
            grounded = false;
        }

        tracing::info!(
            client = self.client.name(),
            attempts,
            status = ?status,
            cited = known.len(),
            presented = presented.len(),
            "generation complete"
        );

        Answer {
            text,
            used_evidence_ids: presented,
            cited_evidence_ids: known,
            status,
            grounded,
            notes,
            error: None,
            attempts,
        }
    }
}

fn wrap(code: &str, message: &str, cause: &AppError) -> AppError {
    AppError::new(code, message).with_details(format!(
        "cause={}; {}",
        cause.code,
        cause.details.clone().unwrap_or_else(|| cause.message.clone())
    ))
}

fn cancelled(attempts: u32) -> Answer {
    tracing::info!(attempts, "generation cancelled");
    Answer::failed(AppError::new(codes::GENERATION_CANCELLED, "Generation was cancelled"), attempts)
}
