pub mod embeddings;
pub mod evidence;
pub mod generate;
pub mod llm;
pub mod ollama;
pub mod pipeline;
pub mod prompt;
pub mod retrieve;
pub mod store;

#[cfg(test)]
mod tests {
    use super::generate::extract_cited_evidence_ids;
    use super::ollama::OllamaClient;

    #[test]
    fn enforces_localhost_only_base_url() {
        assert!(OllamaClient::new("http://127.0.0.1:11434").is_ok());
        assert!(OllamaClient::new("http://127.0.0.1").is_ok());

        assert!(OllamaClient::new("http://localhost:11434").is_err());
        assert!(OllamaClient::new("http://0.0.0.0:11434").is_err());
        assert!(OllamaClient::new("https://api.example.com").is_err());

        assert!(OllamaClient::new("http://127.0.0.1.evil.com:11434").is_err());
        assert!(OllamaClient::new("http://127.0.0.1@evil.com:11434").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:0").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:70000").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:11434/").is_ok());
        assert!(OllamaClient::new("http://127.0.0.1:11434/v1").is_err());

        let err = OllamaClient::new("http://10.0.0.5:11434").unwrap_err();
        assert_eq!(err.code, "AI_OLLAMA_REMOTE_NOT_ALLOWED");
    }

    #[test]
    fn citation_markers_are_parsed_from_model_output() {
        let ids = extract_cited_evidence_ids("March averaged 120 [[analysis:summary_statistics:0123456789ab]].");
        assert!(ids.contains("analysis:summary_statistics:0123456789ab"));
        assert_eq!(ids.len(), 1);
    }
}
