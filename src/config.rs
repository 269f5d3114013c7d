//! Relay configuration parsing, validation, and environment loading.

use std::env;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Environment variables consulted, in order, for the broker URL.
pub const BROKER_URL_ENV_KEYS: [&str; 2] = ["REDIS_URL", "KV_URL"];

fn default_http_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_http_port() -> u16 {
    3000
}

fn default_max_duration_seconds() -> u64 {
    800
}

fn default_grace_seconds() -> u64 {
    5
}

fn default_response_timeout_seconds() -> u64 {
    10
}

fn default_log_flush_interval_ms() -> u64 {
    100
}

fn default_sse_path() -> String {
    "/sse".into()
}

fn default_message_path() -> String {
    "/message".into()
}

fn default_sse_keep_alive_seconds() -> u64 {
    15
}

/// Relay configuration parsed from an optional `config.toml`.
///
/// Every key has a default, so an empty document is a valid config.
/// The broker URL is never read from the file; see
/// [`RelayConfig::load_broker_url`].
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RelayConfig {
    /// Interface the HTTP listener binds to.
    #[serde(default = "default_http_host")]
    pub http_host: IpAddr,
    /// HTTP port for the SSE and message endpoints.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Hard upper bound on a session's lifetime.
    #[serde(default = "default_max_duration_seconds")]
    pub max_duration_seconds: u64,
    /// Seconds subtracted from `max_duration_seconds` so the session can
    /// tear down before the hosting platform kills the invocation.
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: u64,
    /// How long a submit call waits for its correlated response.
    #[serde(default = "default_response_timeout_seconds")]
    pub response_timeout_seconds: u64,
    /// Flush cadence of each session's deferred log buffer.
    #[serde(default = "default_log_flush_interval_ms")]
    pub log_flush_interval_ms: u64,
    /// Route serving the long-lived event stream.
    #[serde(default = "default_sse_path")]
    pub sse_path: String,
    /// Route accepting submitted messages.
    #[serde(default = "default_message_path")]
    pub message_path: String,
    /// SSE keep-alive comment interval; 0 disables keep-alives.
    #[serde(default = "default_sse_keep_alive_seconds")]
    pub sse_keep_alive_seconds: u64,
    /// Broker connection URL (populated at runtime).
    #[serde(skip)]
    pub broker_url: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            http_host: default_http_host(),
            http_port: default_http_port(),
            max_duration_seconds: default_max_duration_seconds(),
            grace_seconds: default_grace_seconds(),
            response_timeout_seconds: default_response_timeout_seconds(),
            log_flush_interval_ms: default_log_flush_interval_ms(),
            sse_path: default_sse_path(),
            message_path: default_message_path(),
            sse_keep_alive_seconds: default_sse_keep_alive_seconds(),
            broker_url: String::new(),
        }
    }
}

impl RelayConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PORT` and `MAX_DURATION` environment overrides.
    ///
    /// Unparseable values are ignored with a warning.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the overridden config fails validation.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(port) = env_number::<u16>("PORT") {
            self.http_port = port;
        }
        if let Some(seconds) = env_number::<u64>("MAX_DURATION") {
            self.max_duration_seconds = seconds;
        }
        self.validate()
    }

    /// Populate `broker_url` from `REDIS_URL`, falling back to `KV_URL`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither variable holds a value. The
    /// relay must not start without a broker.
    pub fn load_broker_url(&mut self) -> Result<()> {
        self.broker_url = BROKER_URL_ENV_KEYS
            .iter()
            .filter_map(|key| env::var(key).ok())
            .find(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                AppError::Config(format!(
                    "broker url not set; export {} or {}",
                    BROKER_URL_ENV_KEYS[0], BROKER_URL_ENV_KEYS[1]
                ))
            })?;
        Ok(())
    }

    /// Socket address the HTTP listener binds to.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http_host, self.http_port)
    }

    /// Effective session lifetime: `max_duration − grace`.
    #[must_use]
    pub fn session_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_duration_seconds.saturating_sub(self.grace_seconds))
    }

    /// Submit-side wait before answering `408`.
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_seconds)
    }

    /// Deferred log flush cadence.
    #[must_use]
    pub fn log_flush_interval(&self) -> Duration {
        Duration::from_millis(self.log_flush_interval_ms)
    }

    /// SSE keep-alive interval, `None` when disabled.
    #[must_use]
    pub fn sse_keep_alive(&self) -> Option<Duration> {
        (self.sse_keep_alive_seconds > 0).then(|| Duration::from_secs(self.sse_keep_alive_seconds))
    }

    fn validate(&self) -> Result<()> {
        if self.grace_seconds >= self.max_duration_seconds {
            return Err(AppError::Config(format!(
                "grace_seconds ({}) must be less than max_duration_seconds ({})",
                self.grace_seconds, self.max_duration_seconds
            )));
        }

        if self.response_timeout_seconds == 0 {
            return Err(AppError::Config(
                "response_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.log_flush_interval_ms == 0 {
            return Err(AppError::Config(
                "log_flush_interval_ms must be greater than zero".into(),
            ));
        }

        for (key, path) in [("sse_path", &self.sse_path), ("message_path", &self.message_path)] {
            if !path.starts_with('/') {
                return Err(AppError::Config(format!("{key} must start with '/'")));
            }
        }

        if self.sse_path == self.message_path {
            return Err(AppError::Config(
                "sse_path and message_path must differ".into(),
            ));
        }

        Ok(())
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}
