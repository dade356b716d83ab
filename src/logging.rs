//! Structured logging infrastructure for mailstorm
//!
//! Sets up the tracing subscriber from configuration with structured output
//! formats. Worker iteration noise stays at debug; classified operation
//! failures surface at warn so a run's console output remains readable at
//! high concurrency.

use crate::config::{Config, LogFormat};
use crate::error::{MailstormError, Result};
use tracing::{warn, Level};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

/// Logging system manager handling subscriber setup
#[derive(Debug)]
pub struct LoggingSystem {
    config: Config,
}

impl LoggingSystem {
    /// Create a new logging system with the given configuration
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Initialize the tracing subscriber
    pub fn initialize(&self) -> Result<()> {
        let log_level = parse_log_level(&self.config.logging.level)?;

        let env_filter = EnvFilter::builder()
            .with_default_directive(log_level.into())
            .from_env_lossy()
            .add_directive("mailstorm=debug".parse().unwrap())
            .add_directive("hyper=info".parse().unwrap())
            .add_directive("reqwest=info".parse().unwrap());

        match self.config.logging.format {
            LogFormat::Json => {
                let subscriber = Registry::default().with(env_filter).with(
                    fmt::layer()
                        .json()
                        .with_current_span(false)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_target(true),
                );
                if let Err(e) = subscriber.try_init() {
                    warn!(
                        "Failed to initialize tracing subscriber (may already be set): {}",
                        e
                    );
                }
            }
            LogFormat::Pretty => {
                let subscriber = Registry::default().with(env_filter).with(
                    fmt::layer()
                        .pretty()
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_target(true)
                        .with_file(false)
                        .with_line_number(false),
                );
                if let Err(e) = subscriber.try_init() {
                    warn!(
                        "Failed to initialize tracing subscriber (may already be set): {}",
                        e
                    );
                }
            }
            LogFormat::Compact => {
                let subscriber = Registry::default().with(env_filter).with(
                    fmt::layer()
                        .compact()
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_target(false),
                );
                if let Err(e) = subscriber.try_init() {
                    warn!(
                        "Failed to initialize tracing subscriber (may already be set): {}",
                        e
                    );
                }
            }
        }

        Ok(())
    }
}

/// Parse log level string to tracing Level
fn parse_log_level(level_str: &str) -> Result<Level> {
    match level_str.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(MailstormError::ConfigError {
            message: format!("Invalid log level: {level_str}"),
            config_key: Some("logging.level".to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("debug"), Ok(Level::DEBUG)));
        assert!(matches!(parse_log_level("info"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("WARN"), Ok(Level::WARN)));
        assert!(matches!(parse_log_level("Error"), Ok(Level::ERROR)));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_logging_system_creation() {
        let system = LoggingSystem::new(Config::default());
        assert_eq!(system.config.logging.level, "info");
    }
}
