use dac_core::error::{codes, AppError};

pub mod ollama_embed;

pub use ollama_embed::OllamaEmbedder;

/// Maps text to vectors of a dimensionality fixed when the embedder is built.
/// Identical text must produce identical vectors.
pub trait Embedder: Send + Sync {
    fn dims(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

pub fn check_dims(expected: usize, v: &[f32]) -> Result<(), AppError> {
    if v.len() != expected {
        return Err(AppError::new(
            codes::EMBEDDING_FAILED,
            "Embedding dimensionality does not match the embedder",
        )
        .with_details(format!("expected={}; got={}", expected, v.len())));
    }
    if v.iter().any(|x| !x.is_finite()) {
        return Err(AppError::new(
            codes::EMBEDDING_FAILED,
            "Embedding contains non-finite values",
        ));
    }
    Ok(())
}

pub fn check_input_len(max_input_chars: usize, text: &str) -> Result<(), AppError> {
    let n = text.chars().count();
    if n > max_input_chars {
        return Err(AppError::new(
            codes::EMBEDDING_FAILED,
            "Embedding input exceeds the model input limit",
        )
        .with_details(format!("chars={}; max_input_chars={}", n, max_input_chars)));
    }
    Ok(())
}
