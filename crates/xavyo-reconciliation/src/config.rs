//! Engine configuration loaded from environment variables.
//!
//! Every setting has a default; a variable that is set but does not parse
//! fails loading instead of silently falling back.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `RECON_LOG_FILTER` | `info` |
//! | `RECON_PAGE_SIZE` | `100` |
//! | `RECON_WORKER_POOL_SIZE` | `4` |
//! | `RECON_CONNECTOR_TIMEOUT_MS` | `30000` |
//! | `RECON_RETRY_MAX_ATTEMPTS` | `3` |
//! | `RECON_RETRY_INITIAL_DELAY_MS` | `200` |
//! | `RECON_RETRY_MAX_DELAY_MS` | `10000` |
//! | `RECON_VIRATTR_CACHE_TTL_SECS` | `300` |

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use xavyo_connector::resilience::RetryConfig;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Settings shared by every execution of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tracing filter directive used when `RUST_LOG` is unset.
    pub log_filter: String,

    /// Connector page size.
    pub page_size: u32,

    /// Default per-resource item concurrency.
    pub worker_pool_size: usize,

    /// Per-call connector timeout.
    pub connector_timeout_ms: u64,

    /// Retries after a timeout or unreachable error.
    pub retry_max_attempts: u32,

    pub retry_initial_delay_ms: u64,

    pub retry_max_delay_ms: u64,

    /// Virtual attribute cache time-to-live.
    pub virattr_cache_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            page_size: 100,
            worker_pool_size: 4,
            connector_timeout_ms: 30_000,
            retry_max_attempts: 3,
            retry_initial_delay_ms: 200,
            retry_max_delay_ms: 10_000,
            virattr_cache_ttl_secs: 300,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            log_filter: lookup("RECON_LOG_FILTER").unwrap_or(defaults.log_filter),
            page_size: parse(&lookup, "RECON_PAGE_SIZE", defaults.page_size)?,
            worker_pool_size: parse(&lookup, "RECON_WORKER_POOL_SIZE", defaults.worker_pool_size)?,
            connector_timeout_ms: parse(
                &lookup,
                "RECON_CONNECTOR_TIMEOUT_MS",
                defaults.connector_timeout_ms,
            )?,
            retry_max_attempts: parse(
                &lookup,
                "RECON_RETRY_MAX_ATTEMPTS",
                defaults.retry_max_attempts,
            )?,
            retry_initial_delay_ms: parse(
                &lookup,
                "RECON_RETRY_INITIAL_DELAY_MS",
                defaults.retry_initial_delay_ms,
            )?,
            retry_max_delay_ms: parse(
                &lookup,
                "RECON_RETRY_MAX_DELAY_MS",
                defaults.retry_max_delay_ms,
            )?,
            virattr_cache_ttl_secs: parse(
                &lookup,
                "RECON_VIRATTR_CACHE_TTL_SECS",
                defaults.virattr_cache_ttl_secs,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(invalid("RECON_PAGE_SIZE", "must be greater than zero"));
        }
        if self.worker_pool_size == 0 {
            return Err(invalid("RECON_WORKER_POOL_SIZE", "must be greater than zero"));
        }
        if self.connector_timeout_ms == 0 {
            return Err(invalid("RECON_CONNECTOR_TIMEOUT_MS", "must be greater than zero"));
        }
        if self.retry_initial_delay_ms > self.retry_max_delay_ms {
            return Err(invalid(
                "RECON_RETRY_INITIAL_DELAY_MS",
                "must not exceed RECON_RETRY_MAX_DELAY_MS",
            ));
        }
        Ok(())
    }

    pub fn connector_timeout(&self) -> Duration {
        Duration::from_millis(self.connector_timeout_ms)
    }

    pub fn virattr_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.virattr_cache_ttl_secs)
    }

    /// Backoff settings for connector calls.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.retry_max_attempts,
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            ..RetryConfig::default()
        }
    }
}

fn invalid(var: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        message: message.into(),
    }
}

fn parse<T, F>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(var, e.to_string())),
        _ => Ok(default),
    }
}
