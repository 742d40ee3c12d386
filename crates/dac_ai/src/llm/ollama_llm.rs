use std::time::Duration;

use async_trait::async_trait;
use dac_core::config::OllamaConfig;
use dac_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};

use super::LlmClient;
use crate::ollama::{classify_ureq_error, OllamaClient};
use crate::prompt::PromptRequest;

#[derive(Debug, Clone)]
pub struct OllamaLlm {
    client: OllamaClient,
    model: String,
}

impl OllamaLlm {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn from_config(cfg: &OllamaConfig) -> Result<Self, AppError> {
        Ok(Self::new(OllamaClient::from_config(cfg)?, cfg.generation_model.clone()))
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    response: String,
}

fn generate_blocking(url: &str, model: &str, prompt: &str, timeout: Duration) -> Result<String, AppError> {
    let req = GenerateRequest {
        model,
        prompt,
        stream: false,
    };
    let body = serde_json::to_value(req).map_err(|e| {
        AppError::new(codes::LLM_REQUEST_FAILED, "Failed to encode generate request").with_details(e.to_string())
    })?;

    let resp = ureq::post(url).timeout(timeout).send_json(body).map_err(|e| match e {
        ureq::Error::Status(429, _) => AppError::new(codes::LLM_RATE_LIMITED, "Generate endpoint rate limited")
            .with_details("status=429")
            .with_retryable(true),
        other => classify_ureq_error(codes::LLM_REQUEST_FAILED, "Failed to call generate endpoint", other),
    })?;

    let v: GenerateResponse = resp.into_json().map_err(|e| {
        AppError::new(codes::LLM_REQUEST_FAILED, "Failed to decode generate response").with_details(e.to_string())
    })?;
    Ok(v.response)
}

#[async_trait]
impl LlmClient for OllamaLlm {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &PromptRequest, timeout: Duration) -> Result<String, AppError> {
        let url = format!("{}/api/generate", self.client.base_url());
        let model = self.model.clone();
        let prompt = request.render();

        tracing::debug!(model = %model, prompt_chars = prompt.chars().count(), "calling generate endpoint");
        tokio::task::spawn_blocking(move || generate_blocking(&url, &model, &prompt, timeout))
            .await
            .map_err(|e| {
                AppError::new(codes::INTERNAL_TASK_FAILED, "Generate task did not complete")
                    .with_details(e.to_string())
            })?
    }

    async fn health(&self) -> Result<(), AppError> {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || client.health_check())
            .await
            .map_err(|e| {
                AppError::new(codes::INTERNAL_TASK_FAILED, "Health check task did not complete")
                    .with_details(e.to_string())
            })?
    }
}
