use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{codes, AppError};

/// Installs the process-wide fmt subscriber. `RUST_LOG` wins over `cfg.level`.
/// Calling it again once a subscriber is installed is a no-op.
pub fn init(cfg: &LoggingConfig) -> Result<(), AppError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(&cfg.level).map_err(|e| {
            AppError::new(codes::CONFIG_INVALID, "Invalid logging level filter")
                .with_details(format!("level={}; err={}", cfg.level, e))
        })?,
    };

    let installed = if cfg.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    };

    if let Err(e) = installed {
        tracing::debug!(err = %e, "tracing subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let cfg = LoggingConfig::default();
        assert!(init(&cfg).is_ok());
        assert!(init(&cfg).is_ok());
    }

    #[test]
    fn rejects_garbage_level_when_env_unset() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let cfg = LoggingConfig {
            level: "dac_core=notalevel".to_string(),
            json: false,
        };
        let err = init(&cfg).unwrap_err();
        assert_eq!(err.code, "CONFIG_INVALID");
    }
}
