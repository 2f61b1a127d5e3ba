//! Redis-backed counter store.
//!
//! Every service replica increments the same Redis keys, so the limit is
//! enforced across the whole deployment.
//!
//! ## Key model
//!
//! - Key: `<key_prefix><client ip>`
//! - Value: integer request count for the current window
//! - TTL: the window length, set by the same script call that creates the key
//!
//! The increment runs as a Lua script so `INCR` and `PEXPIRE` are applied
//! atomically; there is no separate set-if-absent step to race on. Keys are
//! never deleted by this crate, Redis expires them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client, RedisError, Script};
use tokio::sync::OnceCell;

use crate::store::{CounterStore, StoreError, StoreResult, WindowCount};

/// INCR the key; (re)arm the expiry when the window is new or has lost its TTL.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('PTTL', KEYS[1]) < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// Configuration for Redis storage.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Prefix for every counter key (default: "rl:")
    pub key_prefix: String,

    /// Upper bound on a single command round trip (default: 500ms)
    pub response_timeout: Duration,

    /// Upper bound on each connection attempt (default: 2s)
    pub connection_timeout: Duration,

    /// Extra attempts when (re)connecting before a call gives up (default: 1)
    pub connection_retries: usize,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "rl:".to_string(),
            response_timeout: Duration::from_millis(500),
            connection_timeout: Duration::from_secs(2),
            connection_retries: 1,
        }
    }
}

impl RedisStoreConfig {
    fn manager_config(&self) -> ConnectionManagerConfig {
        ConnectionManagerConfig::new()
            .set_response_timeout(self.response_timeout)
            .set_connection_timeout(self.connection_timeout)
            .set_number_of_retries(self.connection_retries)
    }
}

/// Distributed fixed-window counter on Redis.
///
/// The connection is established on first use when the store is built with
/// [`RedisStore::lazy`], so a Redis that is down at boot is picked up as soon
/// as it comes back.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    connection: Arc<OnceCell<ConnectionManager>>,
    config: RedisStoreConfig,
    script: Arc<Script>,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .field("connected", &self.connection.initialized())
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect with default configuration.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the first connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect with custom configuration.
    ///
    /// The connection manager reconnects on its own after the first
    /// connection succeeds. Commands and connection attempts are bounded by
    /// the configured timeouts, so a silent Redis cannot hang a caller.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, RedisError> {
        let store = Self::lazy(url, config)?;
        store.connection().await?;
        Ok(store)
    }

    /// Build a store that connects on its first command.
    ///
    /// # Errors
    /// Returns error only if the URL is invalid.
    pub fn lazy(url: &str, config: RedisStoreConfig) -> Result<Self, RedisError> {
        Ok(Self {
            client: Client::open(url)?,
            connection: Arc::new(OnceCell::new()),
            config,
            script: Arc::new(Script::new(INCREMENT_SCRIPT)),
        })
    }

    /// Whether a connection has been established yet.
    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    async fn connection(&self) -> Result<ConnectionManager, RedisError> {
        self.connection
            .get_or_try_init(|| {
                ConnectionManager::new_with_config(self.client.clone(), self.config.manager_config())
            })
            .await
            .cloned()
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }
}

fn unavailable(e: &RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment_and_check(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> StoreResult<WindowCount> {
        let mut conn = self.connection().await.map_err(|e| unavailable(&e))?;
        // PEXPIRE with 0 would delete the key immediately
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);

        let count: u64 = self
            .script
            .key(self.key(key))
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| unavailable(&e))?;

        Ok(WindowCount::new(count, limit))
    }

    async fn current(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.connection().await.map_err(|e| unavailable(&e))?;
        let count: Option<u64> = conn.get(self.key(key)).await.map_err(|e| unavailable(&e))?;
        Ok(count.unwrap_or(0))
    }
}
