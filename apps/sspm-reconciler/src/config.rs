//! Application configuration loaded from environment variables.
//!
//! Loading is fail-fast: a missing or malformed variable stops the binary
//! with a message naming the variable.

use std::env;

use sspm_db::PoolSettings;
use sspm_discovery::{DiscoveryConfig, FailurePolicy};
use thiserror::Error;

const DEFAULT_LOG_FILTER: &str = "info,sspm_discovery=debug";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("Invalid discovery configuration: {0}")]
    InvalidDiscovery(String),
}

/// Runtime configuration for the reconciler binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub log_filter: String,
    pub pool: PoolSettings,
    pub discovery: DiscoveryConfig,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Required Variables
    ///
    /// - `DATABASE_URL` - PostgreSQL connection string
    ///
    /// # Optional Variables
    ///
    /// - `SSPM_LOG` - Log filter (default: "info,sspm_discovery=debug")
    /// - `SSPM_REPOSITORY_TIMEOUT_SECS` - Per-call repository timeout
    /// - `SSPM_FAILURE_POLICY` - `isolate_per_app` or `abort_on_first_error`
    /// - `SSPM_DB_MAX_CONNECTIONS` - Pool size
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_filter = lookup("SSPM_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let mut discovery = DiscoveryConfig::default();
        if let Some(secs) = parse_var::<u64>(&lookup, "SSPM_REPOSITORY_TIMEOUT_SECS")? {
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    var: "SSPM_REPOSITORY_TIMEOUT_SECS".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
            discovery.repository_timeout_secs = secs;
        }
        if let Some(policy) = parse_var::<FailurePolicy>(&lookup, "SSPM_FAILURE_POLICY")? {
            discovery.failure_policy = policy;
        }
        validate_discovery(&discovery)?;

        let mut pool = PoolSettings::default();
        if let Some(max) = parse_var::<u32>(&lookup, "SSPM_DB_MAX_CONNECTIONS")? {
            if max == 0 {
                return Err(ConfigError::InvalidValue {
                    var: "SSPM_DB_MAX_CONNECTIONS".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
            pool.max_connections = max;
        }

        Ok(Self {
            database_url,
            log_filter,
            pool,
            discovery,
        })
    }
}

fn validate_discovery(discovery: &DiscoveryConfig) -> Result<(), ConfigError> {
    discovery
        .validate()
        .map_err(|e| ConfigError::InvalidDiscovery(e.to_string()))
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(var)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
                var: var.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
}
