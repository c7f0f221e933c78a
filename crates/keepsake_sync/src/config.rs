//! Sync configuration loaded from environment variables.

use std::env;
use std::time::Duration;
use thiserror::Error;

/// Configuration for the remote client and sync engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the remote KV service.
    pub remote_url: String,
    /// Authenticated session token injected by the authorization layer.
    pub session_token: String,
    /// Account email (identity is localpart/domain of this address).
    pub account_email: String,
    /// Remote request timeout (default: 30s).
    pub request_timeout: Duration,
    /// Session versions retained per pointer (default: 10).
    pub session_retention: usize,
    /// Max attempts per pointer per sync pass (default: 3).
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts (default: 250ms).
    pub backoff_base: Duration,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {0}")]
    Invalid(&'static str),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let remote_url =
            env::var("KEEPSAKE_REMOTE_URL").map_err(|_| ConfigError::Missing("KEEPSAKE_REMOTE_URL"))?;
        let session_token = env::var("KEEPSAKE_SESSION_TOKEN")
            .map_err(|_| ConfigError::Missing("KEEPSAKE_SESSION_TOKEN"))?;
        let account_email = env::var("KEEPSAKE_ACCOUNT_EMAIL")
            .map_err(|_| ConfigError::Missing("KEEPSAKE_ACCOUNT_EMAIL"))?;

        let request_timeout = parse_or("KEEPSAKE_REQUEST_TIMEOUT_SECS", 30u64)?;
        let session_retention = parse_or("KEEPSAKE_SESSION_RETENTION", 10usize)?;
        let max_attempts = parse_or("KEEPSAKE_MAX_ATTEMPTS", 3u32)?;
        let backoff_base_ms = parse_or("KEEPSAKE_BACKOFF_BASE_MS", 250u64)?;

        Ok(Self {
            remote_url,
            session_token,
            account_email,
            request_timeout: Duration::from_secs(request_timeout),
            session_retention,
            max_attempts,
            backoff_base: Duration::from_millis(backoff_base_ms),
        })
    }
}

fn parse_or<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value.parse().map_err(|_| ConfigError::Invalid(var)),
        Err(_) => Ok(default),
    }
}
