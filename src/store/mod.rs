//! Shared request counters backing the rate limiter.
//!
//! # Data Flow
//! ```text
//! Admission gate (per request)
//!     → CounterStore::increment_and_check(ip, limit, window)
//!     → redis_store.rs (shared across replicas, INCR + PEXPIRE in one script)
//!       or memory.rs (single process)
//! ```
//!
//! # Design Decisions
//! - One atomic increment per request; no local buffering
//! - Window membership is tracked by key expiry, never by explicit deletes
//! - Failures are surfaced as `StoreError`; the caller picks the fail policy

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::{RedisStore, RedisStoreConfig};

/// Errors raised by a counter store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backing store could not be reached or rejected the command.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete within the caller's deadline.
    #[error("counter store timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type for counter store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Post-increment state of a rate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Requests seen for the key in the current window, this one included.
    pub count: u64,
    /// `count > limit`.
    pub exceeded: bool,
}

impl WindowCount {
    pub fn new(count: u64, limit: u64) -> Self {
        Self {
            count,
            exceeded: count > limit,
        }
    }

    /// Requests still allowed in this window.
    pub fn remaining(&self, limit: u64) -> u64 {
        limit.saturating_sub(self.count)
    }
}

/// A fixed-window counter shared by every instance of the service.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, starting a `window`-long expiry on first use.
    async fn increment_and_check(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> StoreResult<WindowCount>;

    /// Current count for `key`, or 0 if no window is active.
    async fn current(&self, key: &str) -> StoreResult<u64>;
}
