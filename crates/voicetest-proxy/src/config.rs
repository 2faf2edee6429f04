//! Proxy configuration, loaded from environment variables.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8080";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: "0.0.0.0:3000").
    pub bind_address: String,
    /// Base URL of the backend issuing tokens; `/token` is appended.
    pub backend_url: String,
    /// Upstream request timeout.
    pub request_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid backend URL: {0}")]
    InvalidBackendUrl(String),

    #[error("Invalid request timeout: {0}")]
    InvalidTimeout(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("VOICETEST_PROXY_BIND")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let backend_url = vars
            .get("VOICETEST_BACKEND_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        reqwest::Url::parse(&backend_url)
            .map_err(|e| ConfigError::InvalidBackendUrl(format!("'{backend_url}': {e}")))?;
        let backend_url = backend_url.trim_end_matches('/').to_string();

        let timeout_secs = match vars.get("VOICETEST_PROXY_TIMEOUT_SECS") {
            Some(value) => value
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| ConfigError::InvalidTimeout(value.clone()))?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            bind_address,
            backend_url,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}
