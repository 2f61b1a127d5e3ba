//! Upstream API payloads and error definitions.

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur while fetching trusted ranges.
#[derive(Debug, Clone, Error)]
pub enum BootstrapError {
    /// Application credentials are missing, unusable or were rejected.
    #[error("Credential error: {0}")]
    Credential(String),

    /// The application is not installed anywhere, so no installation token
    /// can be minted.
    #[error("Application has no installations")]
    NoInstallation,

    /// The API base URL could not be used.
    #[error("Invalid API URL '{0}'")]
    InvalidUrl(String),

    /// Non-success HTTP status.
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: &'static str, status: u16 },

    /// Transport-level failure.
    #[error("Request to {endpoint} failed: {message}")]
    Http { endpoint: &'static str, message: String },

    /// Response body did not match the expected shape.
    #[error("Unexpected response from {endpoint}: {message}")]
    Decode { endpoint: &'static str, message: String },

    /// Request exceeded the configured timeout.
    #[error("Request to {endpoint} timed out")]
    Timeout { endpoint: &'static str },
}

/// Result type for bootstrap operations.
pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// One installation of the application on an account.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Installation {
    pub id: u64,
}

/// Short-lived installation-scoped access token.
#[derive(Clone, Deserialize)]
pub struct InstallationToken {
    pub token: String,
    #[serde(default)]
    pub expires_at: Option<String>,
}

impl std::fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// The subset of the metadata endpoint this crate reads.
#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    /// Ranges webhook deliveries originate from.
    pub hooks: Vec<String>,
}
