//! Client configuration.
//!
//! Defaults match the development backend. A shell can override them through
//! the environment; a `.env` file is honoured outside of tests.

use std::time::Duration;

use crate::{DEFAULT_BASE_URL, DEFAULT_LOGIN_ROUTE, REQUEST_TIMEOUT};

pub const ENV_BASE_URL: &str = "PHOTOBED_API_BASE";
pub const ENV_TIMEOUT_MS: &str = "PHOTOBED_API_TIMEOUT_MS";
pub const ENV_LOGIN_ROUTE: &str = "PHOTOBED_LOGIN_ROUTE";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Where the host should navigate after the session is invalidated.
    pub login_route: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: REQUEST_TIMEOUT,
            login_route: DEFAULT_LOGIN_ROUTE.to_string(),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_login_route(mut self, route: impl Into<String>) -> Self {
        self.login_route = route.into();
        self
    }

    /// Loads overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to keep tests hermetic.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source; unset or blank
    /// variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(base_url) = get(ENV_BASE_URL) {
            config.base_url = base_url.trim().to_string();
        }

        if let Some(raw) = get(ENV_TIMEOUT_MS) {
            let ms = raw.trim().parse::<u64>().map_err(|e| {
                ConfigError::InvalidValue(ENV_TIMEOUT_MS.to_string(), e.to_string())
            })?;
            if ms == 0 {
                return Err(ConfigError::InvalidValue(
                    ENV_TIMEOUT_MS.to_string(),
                    "timeout must be greater than zero".to_string(),
                ));
            }
            config.timeout = Duration::from_millis(ms);
        }

        if let Some(route) = get(ENV_LOGIN_ROUTE) {
            config.login_route = route.trim().to_string();
        }

        Ok(config)
    }
}
