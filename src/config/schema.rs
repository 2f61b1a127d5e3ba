//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gate.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GateConfig {
    /// Listener configuration (bind address, request timeout).
    pub listener: ListenerConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Shared counter store connection.
    pub store: StoreConfig,

    /// Upstream application credentials used to fetch trusted ranges.
    pub github: GithubConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Total time allowed for one request, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// What to do when the trusted ranges cannot be fetched at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapFailurePolicy {
    /// Rate limit everyone, trusting no range.
    #[default]
    NoBypass,
    /// Turn rate limiting off.
    Unlimited,
    /// Refuse to start.
    Abort,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Requests allowed per client IP per window.
    pub max_requests: u64,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Deadline for a single counter store call, in milliseconds.
    pub store_timeout_ms: u64,

    /// Prefix for counter keys in the shared store.
    pub key_prefix: String,

    /// Fallback when the trusted range bootstrap fails.
    pub bootstrap_failure: BootstrapFailurePolicy,

    /// Re-fetch trusted ranges every N seconds (0 = fetch once at boot).
    pub refresh_interval_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_requests: 100,
            window_secs: 60,
            store_timeout_ms: 500,
            key_prefix: "rl:".to_string(),
            bootstrap_failure: BootstrapFailurePolicy::default(),
            refresh_interval_secs: 0,
        }
    }
}

/// Counter store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Redis,
    /// Per-process counters; only correct for a single replica.
    Memory,
}

/// Counter store connection.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Full connection URL; when set, host/port/password/db are ignored.
    pub url: Option<String>,

    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: u32,

    /// Upper bound on each connection attempt, in milliseconds.
    pub connect_timeout_ms: u64,
}

impl StoreConfig {
    /// Connection URL for the Redis client.
    pub fn redis_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            connect_timeout_ms: 2000,
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("backend", &self.backend)
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("db", &self.db)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

/// Upstream application settings.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GithubConfig {
    /// Numeric application id.
    pub app_id: Option<String>,

    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    /// Inline PEM private key.
    pub private_key: Option<String>,

    /// Path to a PEM private key file.
    pub private_key_path: Option<String>,

    /// API base URL.
    pub api_url: String,

    /// Per-call timeout for the bootstrap requests, in seconds.
    pub timeout_secs: u64,

    /// User-Agent sent upstream (required by the API).
    pub user_agent: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            client_id: None,
            client_secret: None,
            private_key: None,
            private_key_path: None,
            api_url: "https://api.github.com".to_string(),
            timeout_secs: 10,
            user_agent: concat!("webhook-gate/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl fmt::Debug for GithubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubConfig")
            .field("app_id", &self.app_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .field("api_url", &self.api_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "text" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
