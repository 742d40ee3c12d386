pub mod analysis;
pub mod cache;
pub mod canonical;
pub mod config;
pub mod dataset;
pub mod error;
pub mod logging;

#[cfg(test)]
mod tests {
    use super::error::{codes, AppError};

    #[test]
    fn app_error_is_structured() {
        let err = AppError::new(codes::DATASET_NOT_FOUND, "dataset missing").with_retryable(false);
        assert_eq!(err.code, "DATASET_NOT_FOUND");
        assert_eq!(err.message, "dataset missing");
        assert_eq!(err.retryable, false);
        assert!(err.is(codes::DATASET_NOT_FOUND));
    }

    #[test]
    fn app_error_display_carries_code() {
        let err = AppError::new(codes::CONFIG_INVALID, "bad config").with_details("retrieval.top_k=0");
        assert_eq!(err.to_string(), "[CONFIG_INVALID] bad config");
        assert_eq!(err.details.as_deref(), Some("retrieval.top_k=0"));
    }
}
