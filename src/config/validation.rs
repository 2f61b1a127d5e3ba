//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits and timeouts > 0, addresses parse)
//! - Check credentials are present when rate limiting is enabled
//!
//! Returns all validation errors, not just the first.

use std::net::SocketAddr;

use redis::IntoConnectionInfo;
use thiserror::Error;

use crate::config::schema::{GateConfig, StoreBackend};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address '{0}' is not a socket address")]
    InvalidBindAddress(String),

    #[error("observability.metrics_address '{0}' is not a socket address")]
    InvalidMetricsAddress(String),

    #[error("rate_limit.max_requests must be greater than 0")]
    ZeroMaxRequests,

    #[error("rate_limit.window_secs must be greater than 0")]
    ZeroWindow,

    #[error("rate_limit.store_timeout_ms must be greater than 0")]
    ZeroStoreTimeout,

    #[error("github.app_id is required when rate limiting is enabled")]
    MissingAppId,

    #[error("github.api_url '{0}' is not a valid URL")]
    InvalidApiUrl(String),

    #[error("store connection URL is not a valid redis URL: {0}")]
    InvalidStoreUrl(String),

    #[error("store.connect_timeout_ms must be greater than 0")]
    ZeroConnectTimeout,
}

/// Check a parsed configuration before it is accepted.
pub fn validate_config(config: &GateConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    let rl = &config.rate_limit;
    if rl.max_requests == 0 {
        errors.push(ValidationError::ZeroMaxRequests);
    }
    if rl.window_secs == 0 {
        errors.push(ValidationError::ZeroWindow);
    }
    if rl.store_timeout_ms == 0 {
        errors.push(ValidationError::ZeroStoreTimeout);
    }

    if rl.enabled {
        if config.github.app_id.as_deref().is_none_or(str::is_empty) {
            errors.push(ValidationError::MissingAppId);
        }
        if url::Url::parse(&config.github.api_url).is_err() {
            errors.push(ValidationError::InvalidApiUrl(config.github.api_url.clone()));
        }
        if config.store.backend == StoreBackend::Redis {
            // The error text never echoes the URL; it may carry a password
            if let Err(e) = config.store.redis_url().as_str().into_connection_info() {
                errors.push(ValidationError::InvalidStoreUrl(e.to_string()));
            }
            if config.store.connect_timeout_ms == 0 {
                errors.push(ValidationError::ZeroConnectTimeout);
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
