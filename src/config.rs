//! Configuration management for mailstorm
//!
//! Target endpoints, credentials, and tuning knobs are loaded from
//! `MAILSTORM_*` environment variables with sensible defaults, so nothing
//! about the system under test is hard-coded into the harness.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{MailstormError, Result};

/// Main configuration structure for the load harness
#[derive(Debug, Clone)]
pub struct Config {
    pub target: TargetConfig,
    pub session: SessionConfig,
    pub pool: PoolConfig,
    pub load: LoadConfig,
    pub baseline: BaselineConfig,
    pub logging: LoggingConfig,
}

/// Endpoints of the platform under test
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub imap_host: String,
    pub imap_port: u16,
    pub api_url: String,
    pub auth_url: String,
    pub mail_domain: String,
}

/// Simulated-user credential management
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Number of distinct credential partitions; simulated-user ids map onto
    /// partitions by modulo, bounding the total credential count.
    pub partitions: u64,
    /// Cached token lifetime
    pub token_ttl: Duration,
    /// A token is not reused with less than this much lifetime remaining,
    /// so it cannot expire mid-request.
    pub refresh_margin: Duration,
    /// Shared password for all load-test accounts
    pub password: String,
}

/// Connection pool behavior
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Probability that a released connection is closed instead of pooled,
    /// emulating reconnect churn. Drawn independently per release.
    pub force_close_probability: f64,
}

/// Worker and scheduling behavior
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Bounded timeout applied to every protocol operation
    pub request_timeout: Duration,
    /// Inter-iteration think time bounds (uniformly jittered)
    pub think_time_min: Duration,
    pub think_time_max: Duration,
    /// How long to wait for in-flight iterations after the final stage
    pub drain_grace: Duration,
    /// Interval at which the orchestrator adjusts worker counts
    pub control_tick: Duration,
    /// Seed for deterministic workload randomness; None draws from entropy
    pub seed: Option<u64>,
}

/// Baseline capture and comparison
#[derive(Debug, Clone)]
pub struct BaselineConfig {
    /// Independent measurement iterations averaged into a baseline
    pub iterations: usize,
    /// Directory holding versioned baseline records per environment
    pub directory: PathBuf,
    /// Alert ceiling multipliers applied to baseline percentiles
    pub p95_multiplier: f64,
    pub p99_multiplier: f64,
    /// Length and concurrency of one measurement iteration
    pub measure_duration: Duration,
    pub measure_concurrency: usize,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: TargetConfig::default(),
            session: SessionConfig::default(),
            pool: PoolConfig::default(),
            load: LoadConfig::default(),
            baseline: BaselineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            smtp_host: "127.0.0.1".to_string(),
            smtp_port: 2525,
            imap_host: "127.0.0.1".to_string(),
            imap_port: 1143,
            api_url: "http://127.0.0.1:8080".to_string(),
            auth_url: "http://127.0.0.1:8081".to_string(),
            mail_domain: "loadtest.example.com".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            partitions: 500,
            token_ttl: Duration::from_secs(300),
            refresh_margin: Duration::from_secs(5),
            password: "loadtest-password".to_string(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            force_close_probability: 0.05,
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            think_time_min: Duration::from_millis(100),
            think_time_max: Duration::from_millis(750),
            drain_grace: Duration::from_secs(30),
            control_tick: Duration::from_millis(250),
            seed: None,
        }
    }
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            iterations: 3,
            directory: PathBuf::from("baselines"),
            p95_multiplier: 1.2,
            p99_multiplier: 1.3,
            measure_duration: Duration::from_secs(10),
            measure_concurrency: 4,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from `MAILSTORM_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(host) = std::env::var("MAILSTORM_SMTP_HOST") {
            config.target.smtp_host = host;
        }
        config.target.smtp_port = env_u16("MAILSTORM_SMTP_PORT", config.target.smtp_port)?;
        if let Ok(host) = std::env::var("MAILSTORM_IMAP_HOST") {
            config.target.imap_host = host;
        }
        config.target.imap_port = env_u16("MAILSTORM_IMAP_PORT", config.target.imap_port)?;
        if let Ok(url) = std::env::var("MAILSTORM_API_URL") {
            config.target.api_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(url) = std::env::var("MAILSTORM_AUTH_URL") {
            config.target.auth_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(domain) = std::env::var("MAILSTORM_MAIL_DOMAIN") {
            config.target.mail_domain = domain;
        }

        config.session.partitions =
            env_u64("MAILSTORM_PARTITIONS", config.session.partitions)?.max(1);
        config.session.token_ttl =
            Duration::from_secs(env_u64("MAILSTORM_TOKEN_TTL_SECS", 300)?);
        config.session.refresh_margin =
            Duration::from_secs(env_u64("MAILSTORM_REFRESH_MARGIN_SECS", 5)?);
        if let Ok(password) = std::env::var("MAILSTORM_PASSWORD") {
            config.session.password = password;
        }

        config.pool.force_close_probability =
            env_f64("MAILSTORM_FORCE_CLOSE_PROBABILITY", 0.05)?;

        config.load.request_timeout =
            Duration::from_secs(env_u64("MAILSTORM_REQUEST_TIMEOUT_SECS", 10)?);
        config.load.think_time_min =
            Duration::from_millis(env_u64("MAILSTORM_THINK_TIME_MIN_MS", 100)?);
        config.load.think_time_max =
            Duration::from_millis(env_u64("MAILSTORM_THINK_TIME_MAX_MS", 750)?);
        config.load.drain_grace =
            Duration::from_secs(env_u64("MAILSTORM_DRAIN_GRACE_SECS", 30)?);
        config.load.seed = match std::env::var("MAILSTORM_SEED") {
            Ok(raw) => Some(raw.parse().map_err(|_| MailstormError::ConfigError {
                message: format!("invalid seed value: {raw}"),
                config_key: Some("MAILSTORM_SEED".to_string()),
            })?),
            Err(_) => None,
        };

        config.baseline.iterations = env_u64("MAILSTORM_BASELINE_ITERATIONS", 3)? as usize;
        if let Ok(dir) = std::env::var("MAILSTORM_BASELINE_DIR") {
            config.baseline.directory = PathBuf::from(dir);
        }
        config.baseline.p95_multiplier = env_f64("MAILSTORM_P95_MULTIPLIER", 1.2)?;
        config.baseline.p99_multiplier = env_f64("MAILSTORM_P99_MULTIPLIER", 1.3)?;
        config.baseline.measure_duration =
            Duration::from_secs(env_u64("MAILSTORM_MEASURE_DURATION_SECS", 10)?);
        config.baseline.measure_concurrency =
            env_u64("MAILSTORM_MEASURE_CONCURRENCY", 4)? as usize;

        if let Ok(level) = std::env::var("MAILSTORM_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("MAILSTORM_LOG_FORMAT") {
            config.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                "compact" => LogFormat::Compact,
                other => {
                    return Err(MailstormError::ConfigError {
                        message: format!("invalid log format: {other}"),
                        config_key: Some("MAILSTORM_LOG_FORMAT".to_string()),
                    })
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.pool.force_close_probability) {
            return Err(MailstormError::ConfigError {
                message: format!(
                    "force-close probability must be in [0, 1], got {}",
                    self.pool.force_close_probability
                ),
                config_key: Some("MAILSTORM_FORCE_CLOSE_PROBABILITY".to_string()),
            });
        }
        if self.load.think_time_min > self.load.think_time_max {
            return Err(MailstormError::ConfigError {
                message: "think time minimum exceeds maximum".to_string(),
                config_key: Some("MAILSTORM_THINK_TIME_MIN_MS".to_string()),
            });
        }
        if self.baseline.iterations == 0 {
            return Err(MailstormError::ConfigError {
                message: "baseline iterations must be at least 1".to_string(),
                config_key: Some("MAILSTORM_BASELINE_ITERATIONS".to_string()),
            });
        }
        if self.session.refresh_margin >= self.session.token_ttl {
            return Err(MailstormError::ConfigError {
                message: "refresh margin must be shorter than the token TTL".to_string(),
                config_key: Some("MAILSTORM_REFRESH_MARGIN_SECS".to_string()),
            });
        }
        Ok(())
    }

    /// Load-test account name for a credential partition
    pub fn username_for_partition(&self, partition: u64) -> String {
        format!("loadtest-{partition}@{}", self.target.mail_domain)
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    parse_env(key, default)
}

fn env_u16(key: &str, default: u16) -> Result<u16> {
    parse_env(key, default)
}

fn env_f64(key: &str, default: f64) -> Result<f64> {
    parse_env(key, default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| MailstormError::ConfigError {
            message: format!("invalid value for {key}: {raw}"),
            config_key: Some(key.to_string()),
        }),
        Err(_) => Ok(default),
    }
}
