//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the application credentials from config and environment
//! - Fetch the trusted ranges once, applying the bootstrap failure policy
//! - Connect the counter store
//! - Start background tasks (range refresh, memory store purge)
//!
//! Nothing here serves traffic; the gate is ready before the listener starts.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::loader::find_private_key;
use crate::config::{BootstrapFailurePolicy, GateConfig, StoreBackend};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::security::{AdmissionGate, GateLimits, TrustedRanges};
use crate::store::{CounterStore, MemoryStore, RedisStore, RedisStoreConfig};
use crate::upstream::{spawn_refresh, AppCredentials, BootstrapError, BootstrapResult, Bootstrapper};

/// Errors that stop the process from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Trusted range bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),
}

/// Build the bootstrapper from configuration.
///
/// Missing or unreadable credentials are reported as
/// [`BootstrapError::Credential`].
pub fn bootstrapper_from_config(
    config: &GateConfig,
    key_dir: &Path,
) -> BootstrapResult<Bootstrapper> {
    let github = &config.github;

    let app_id = github
        .app_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| BootstrapError::Credential("no application id configured".into()))?;

    let private_key = find_private_key(config, key_dir)
        .map_err(|e| BootstrapError::Credential(e.to_string()))?
        .ok_or_else(|| BootstrapError::Credential("no private key configured or found".into()))?;

    let credentials = AppCredentials::new(app_id, private_key).with_client_id(github.client_id.clone());

    Bootstrapper::new(
        credentials,
        &github.api_url,
        Duration::from_secs(github.timeout_secs),
        github.user_agent.clone(),
    )
}

/// Resolve the trusted ranges, applying `rate_limit.bootstrap_failure`.
///
/// `Ok(None)` means rate limiting must stay off.
pub async fn bootstrap_trusted_ranges(
    config: &GateConfig,
    bootstrapper: BootstrapResult<&Bootstrapper>,
) -> Result<Option<TrustedRanges>, StartupError> {
    let fetched = match bootstrapper {
        Ok(b) => b.fetch_trusted_ranges().await,
        Err(e) => Err(e),
    };

    match (fetched, config.rate_limit.bootstrap_failure) {
        (Ok(blocks), _) => Ok(Some(TrustedRanges::new(blocks))),
        (Err(e), BootstrapFailurePolicy::Abort) => Err(StartupError::Bootstrap(e)),
        (Err(e), BootstrapFailurePolicy::Unlimited) => {
            tracing::error!(error = %e, "Trusted range bootstrap failed, rate limiting disabled");
            Ok(None)
        }
        (Err(e), BootstrapFailurePolicy::NoBypass) => {
            tracing::error!(
                error = %e,
                "Trusted range bootstrap failed, rate limiting every client"
            );
            Ok(Some(TrustedRanges::empty()))
        }
    }
}

/// Redis client settings derived from the gate configuration.
///
/// A single command may take no longer than the gate's store timeout.
pub fn redis_store_config(config: &GateConfig) -> RedisStoreConfig {
    RedisStoreConfig {
        key_prefix: config.rate_limit.key_prefix.clone(),
        response_timeout: config.rate_limit.store_timeout(),
        connection_timeout: config.store.connect_timeout(),
        ..RedisStoreConfig::default()
    }
}

/// Connect the configured counter store.
///
/// A Redis that is unreachable at boot does not turn the limiter off: the
/// store connects on first use and requests fail open until it does.
/// `None` only when the connection URL itself is unusable.
pub async fn connect_store(
    config: &GateConfig,
    shutdown: &Shutdown,
) -> Option<Arc<dyn CounterStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory counter store; limits are per process");
            let store = Arc::new(MemoryStore::new());
            spawn_memory_purge(store.clone(), config.rate_limit.window(), shutdown);
            Some(store)
        }
        StoreBackend::Redis => {
            let url = config.store.redis_url();
            let store_config = redis_store_config(config);
            match RedisStore::connect_with_config(&url, store_config.clone()).await {
                Ok(store) => {
                    tracing::info!(host = %config.store.host, "Connected to counter store");
                    Some(Arc::new(store))
                }
                Err(e) => match RedisStore::lazy(&url, store_config) {
                    Ok(store) => {
                        tracing::error!(
                            error = %e,
                            "Counter store unreachable, failing open until it recovers"
                        );
                        Some(Arc::new(store))
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Counter store URL unusable, rate limiting disabled");
                        None
                    }
                },
            }
        }
    }
}

fn spawn_memory_purge(store: Arc<MemoryStore>, every: Duration, shutdown: &Shutdown) {
    let mut shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = store.purge_expired();
                    tracing::trace!(purged, "Purged expired rate windows");
                }
                _ = shutdown.recv() => break,
            }
        }
    });
}

/// Assemble the admission gate, or `None` when rate limiting is off.
pub async fn build_gate(
    config: &GateConfig,
    shutdown: &Shutdown,
) -> Result<Option<Arc<AdmissionGate>>, StartupError> {
    if !config.rate_limit.enabled {
        tracing::info!("Rate limiting disabled");
        return Ok(None);
    }

    let bootstrapper = bootstrapper_from_config(config, Path::new(".")).map(Arc::new);
    let trusted =
        match bootstrap_trusted_ranges(config, bootstrapper.as_deref().map_err(Clone::clone)).await? {
            Some(trusted) => trusted,
            None => return Ok(None),
        };
    metrics::record_trusted_ranges(trusted.len());

    let Some(store) = connect_store(config, shutdown).await else {
        return Ok(None);
    };

    if config.rate_limit.refresh_interval_secs > 0 {
        if let Ok(bootstrapper) = bootstrapper {
            spawn_refresh(
                bootstrapper,
                trusted.clone(),
                Duration::from_secs(config.rate_limit.refresh_interval_secs),
                shutdown.subscribe(),
            );
        }
    }

    let limits = GateLimits::from(&config.rate_limit);
    tracing::info!(
        max_requests = limits.max_requests,
        window_secs = limits.window.as_secs(),
        trusted_ranges = trusted.len(),
        "Rate limiting enabled"
    );

    Ok(Some(Arc::new(AdmissionGate::new(trusted, store, limits))))
}
