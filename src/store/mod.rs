//! Counter storage for admission windows.
//!
//! The decision engine talks to a [`CounterStore`]: an atomic
//! increment-with-expiry keyed by throttling bucket. Two implementations
//! exist, a process-local map and a shared networked store, with
//! [`FailoverStore`] selecting between them at runtime.

mod failover;
mod memory;
mod shared;

pub use failover::{FailoverStore, StoreSettings};
pub use memory::LocalStore;
pub use shared::SharedStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in counter store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),
    #[error("store operation failed: {0}")]
    Operation(String),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Usage observed for one key within its current fixed window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowUsage {
    /// Requests counted against the window so far
    pub count: u64,
    /// When the window elapses and the count resets
    pub resets_at: DateTime<Utc>,
}

/// Trait for counter store implementations.
///
/// `increment` must be atomic per key: concurrent callers may not lose
/// updates. Stale windows self-clean through a TTL or an explicit reset on
/// the next access.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count one request against the key's current window and return the
    /// resulting usage.
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowUsage, StoreError>;

    /// Read the key's current usage without consuming budget.
    async fn peek(&self, key: &str, window: Duration) -> Result<WindowUsage, StoreError>;
}

/// Start and end (epoch seconds) of the fixed window containing now.
pub(crate) fn window_bounds(window: Duration) -> (u64, u64) {
    let window_secs = window.as_secs().max(1);
    let now = Utc::now().timestamp().max(0) as u64;
    let start = (now / window_secs) * window_secs;
    (start, start + window_secs)
}

/// Convert a window boundary back into a timestamp for clients.
pub(crate) fn reset_time(window_end: u64) -> DateTime<Utc> {
    DateTime::from_timestamp(window_end as i64, 0).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_bounds_align_to_window_length() {
        let (start, end) = window_bounds(Duration::from_secs(60));

        assert_eq!(start % 60, 0);
        assert_eq!(end, start + 60);
    }

    #[test]
    fn test_window_bounds_contain_now() {
        let now = Utc::now().timestamp() as u64;
        let (start, end) = window_bounds(Duration::from_secs(900));

        assert!(start <= now);
        assert!(now < end);
    }

    #[test]
    fn test_zero_window_treated_as_one_second() {
        let (start, end) = window_bounds(Duration::ZERO);
        assert_eq!(end, start + 1);
    }
}
