use std::time::Duration;

use dac_core::config::OllamaConfig;
use dac_core::error::{codes, AppError};

const LOCAL_ORIGIN: &str = "http://127.0.0.1";
const HEALTH_TIMEOUT: Duration = Duration::from_millis(800);

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
}

impl OllamaClient {
    /// Create a client for Ollama. This is strictly limited to `127.0.0.1`, optionally with a port.
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let rejected = || {
            AppError::new(
                codes::OLLAMA_REMOTE_NOT_ALLOWED,
                "Ollama base URL must be localhost (127.0.0.1)",
            )
            .with_details(format!("base_url={base_url}"))
        };

        let rest = base_url.strip_prefix(LOCAL_ORIGIN).ok_or_else(rejected)?;
        if !rest.is_empty() {
            let port = rest.strip_prefix(':').ok_or_else(rejected)?;
            if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
                return Err(rejected());
            }
            match port.parse::<u32>() {
                Ok(p) if (1..=65535).contains(&p) => {}
                _ => return Err(rejected()),
            }
        }

        Ok(Self { base_url })
    }

    pub fn from_config(cfg: &OllamaConfig) -> Result<Self, AppError> {
        Self::new(&cfg.base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Calls `GET /api/tags`. A runtime that answers with a non-200 status is unhealthy; one
    /// that cannot be reached at all is reported as unreachable and retryable.
    pub fn health_check(&self) -> Result<(), AppError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = ureq::get(&url).timeout(HEALTH_TIMEOUT).call();

        match resp {
            Ok(r) if r.status() == 200 => Ok(()),
            Ok(r) => Err(AppError::new(codes::OLLAMA_UNHEALTHY, "Ollama health check failed")
                .with_details(format!("status={}", r.status()))),
            Err(ureq::Error::Status(status, _)) => {
                Err(AppError::new(codes::OLLAMA_UNHEALTHY, "Ollama health check failed")
                    .with_details(format!("status={status}"))
                    .with_retryable(status >= 500))
            }
            Err(ureq::Error::Transport(t)) => Err(AppError::new(
                codes::OLLAMA_UNREACHABLE,
                "Failed to reach Ollama on 127.0.0.1",
            )
            .with_details(t.to_string())
            .with_retryable(true)),
        }
    }
}

/// Maps a ureq failure onto the shared error shape. Transport failures, 429 and 5xx are
/// retryable; other statuses are not.
pub(crate) fn classify_ureq_error(code: &str, message: &str, err: ureq::Error) -> AppError {
    match err {
        ureq::Error::Status(429, _) => AppError::new(code, message)
            .with_details("status=429; rate limited")
            .with_retryable(true),
        ureq::Error::Status(status, _) => AppError::new(code, message)
            .with_details(format!("status={status}"))
            .with_retryable(status >= 500),
        ureq::Error::Transport(t) => AppError::new(code, message)
            .with_details(t.to_string())
            .with_retryable(true),
    }
}
