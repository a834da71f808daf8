//! Process-local counter store.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{reset_time, window_bounds, CounterStore, StoreError, WindowUsage};

/// A counter entry for one key's current window.
#[derive(Debug, Clone)]
struct CounterEntry {
    count: u64,
    expires_at: u64,
}

/// In-memory counter store.
///
/// Atomicity holds within a single process: the map shard lock covers the
/// read-increment-write. Horizontally scaled instances each keep an
/// independent budget; only [`super::SharedStore`] gives a shared one.
#[derive(Debug, Clone, Default)]
pub struct LocalStore {
    entries: Arc<DashMap<String, CounterEntry>>,
}

impl LocalStore {
    /// Create a new empty local store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop entries whose window has elapsed.
    ///
    /// Expired entries are also reset lazily on access; this sweep exists so
    /// abandoned keys do not accumulate.
    pub fn purge_expired(&self) {
        let now = Utc::now().timestamp().max(0) as u64;
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Number of live entries, for tests and diagnostics.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl CounterStore for LocalStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowUsage, StoreError> {
        let (_, end) = window_bounds(window);
        let now = Utc::now().timestamp().max(0) as u64;

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert(CounterEntry {
                count: 0,
                expires_at: end,
            });

        if now >= entry.expires_at {
            entry.count = 0;
            entry.expires_at = end;
        }
        entry.count += 1;

        Ok(WindowUsage {
            count: entry.count,
            resets_at: reset_time(entry.expires_at),
        })
    }

    async fn peek(&self, key: &str, window: Duration) -> Result<WindowUsage, StoreError> {
        let (_, end) = window_bounds(window);
        let now = Utc::now().timestamp().max(0) as u64;

        let count = match self.entries.get(key) {
            Some(entry) if now < entry.expires_at => entry.count,
            _ => 0,
        };

        Ok(WindowUsage {
            count,
            resets_at: reset_time(end),
        })
    }
}
