use std::time::Duration;

use dac_core::config::OllamaConfig;
use dac_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};

use super::{check_dims, check_input_len, Embedder};
use crate::ollama::{classify_ureq_error, OllamaClient};

#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
    dims: usize,
    max_input_chars: usize,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient, model: impl Into<String>, dims: usize, max_input_chars: usize) -> Self {
        Self {
            client,
            model: model.into(),
            dims,
            max_input_chars,
        }
    }

    pub fn from_config(cfg: &OllamaConfig) -> Result<Self, AppError> {
        Ok(Self::new(
            OllamaClient::from_config(cfg)?,
            cfg.embedding_model.clone(),
            cfg.embedding_dims,
            cfg.max_embed_input_chars,
        ))
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

impl Embedder for OllamaEmbedder {
    fn dims(&self) -> usize {
        self.dims
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        // Over-long input is an error; callers split before embedding.
        check_input_len(self.max_input_chars, text)?;

        let url = format!("{}/api/embeddings", self.client.base_url());
        let req = EmbeddingsRequest {
            model: &self.model,
            prompt: text,
        };
        let body = serde_json::to_value(req).map_err(|e| {
            AppError::new(codes::EMBEDDING_FAILED, "Failed to encode embeddings request")
                .with_details(e.to_string())
        })?;
        let resp = ureq::post(&url)
            .timeout(Duration::from_secs(10))
            .send_json(body)
            .map_err(|e| classify_ureq_error(codes::EMBEDDING_FAILED, "Failed to call embeddings endpoint", e))?;

        let v: EmbeddingsResponse = resp.into_json().map_err(|e| {
            AppError::new(codes::EMBEDDING_FAILED, "Failed to decode embeddings response")
                .with_details(e.to_string())
        })?;
        check_dims(self.dims, &v.embedding)?;
        Ok(v.embedding)
    }
}
