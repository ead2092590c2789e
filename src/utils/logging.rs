//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` fmt subscriber driven by [`LoggingConfig`].
//! `RUST_LOG` wins over the configured level when set.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use tracing_subscriber::EnvFilter;

/// Build the env filter, defaulting to the configured level
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string().to_lowercase()))
}

/// Install the global subscriber.
///
/// Fails with `ConfigError` if console output is disabled or a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if !config.log_to_console {
        return Err(ProtocolError::ConfigError(
            "No logging output enabled".to_string(),
        ));
    }

    let builder = tracing_subscriber::fmt()
        .with_env_filter(build_filter(config))
        .with_target(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;

    tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_console_is_rejected() {
        let config = LoggingConfig {
            log_to_console: false,
            ..LoggingConfig::default()
        };
        assert!(matches!(
            init_logging(&config),
            Err(ProtocolError::ConfigError(_))
        ));
    }

    #[test]
    fn test_filter_uses_configured_level() {
        let config = LoggingConfig {
            log_level: tracing::Level::DEBUG,
            ..LoggingConfig::default()
        };
        if std::env::var("RUST_LOG").is_err() {
            assert_eq!(
                build_filter(&config).max_level_hint(),
                Some(tracing_subscriber::filter::LevelFilter::DEBUG)
            );
        }
    }
}
