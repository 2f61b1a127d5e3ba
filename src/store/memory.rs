//! In-process counter store.
//!
//! Same fixed-window contract as the Redis store, for single-instance
//! deployments and tests. Each key's window is guarded by its DashMap shard,
//! so increments on the same key never interleave.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::store::{CounterStore, StoreResult, WindowCount};

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    expires_at: Instant,
}

/// A thread-safe in-memory fixed-window counter.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: DashMap<String, Window>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop windows whose expiry has passed. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, w| w.expires_at > now);
        before - self.windows.len()
    }

    /// Number of keys currently tracked (expired or not).
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment_and_check(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> StoreResult<WindowCount> {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            expires_at: now + window,
        });

        if entry.expires_at <= now {
            entry.count = 0;
            entry.expires_at = now + window;
        }
        entry.count += 1;

        Ok(WindowCount::new(entry.count, limit))
    }

    async fn current(&self, key: &str) -> StoreResult<u64> {
        let now = Instant::now();
        Ok(self
            .windows
            .get(key)
            .filter(|w| w.expires_at > now)
            .map_or(0, |w| w.count))
    }
}
