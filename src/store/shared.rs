//! Shared counter store backed by Redis.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;
use std::time::Duration;
use tracing::{debug, info};

use super::{reset_time, window_bounds, CounterStore, StoreError, WindowUsage};

/// Atomic increment-with-expiry. The TTL is stamped when the window's key
/// is first touched, so stale windows self-clean server-side.
const INCREMENT_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return current
"#;

/// Counter store on a networked key-value store reachable by all instances.
///
/// This is the only implementation that gives a correct shared budget when
/// the service is horizontally scaled. Every operation carries a bounded
/// timeout; elapsing it surfaces as [`StoreError::Timeout`].
pub struct SharedStore {
    conn: MultiplexedConnection,
    script: Script,
    key_prefix: String,
    op_timeout: Duration,
}

impl SharedStore {
    /// Connect to the store at `url`.
    pub async fn connect(
        url: &str,
        key_prefix: &str,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;

        let conn = tokio::time::timeout(op_timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| StoreError::Timeout(op_timeout))?
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        info!(url = %url, "Connected to shared counter store");

        Ok(Self {
            conn,
            script: Script::new(INCREMENT_SCRIPT),
            key_prefix: key_prefix.to_string(),
            op_timeout,
        })
    }

    /// Round-trip liveness check.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let reply: String = tokio::time::timeout(
            self.op_timeout,
            redis::cmd("PING").query_async(&mut conn),
        )
        .await
        .map_err(|_| StoreError::Timeout(self.op_timeout))?
        .map_err(|e| StoreError::Operation(e.to_string()))?;

        debug!(reply = %reply, "Shared store ping");
        Ok(())
    }

    /// Storage key for one throttling key's current window.
    fn bucket_key(&self, key: &str, window_start: u64) -> String {
        format!("{}{}:{}", self.key_prefix, key, window_start)
    }
}

#[async_trait]
impl CounterStore for SharedStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowUsage, StoreError> {
        let (start, end) = window_bounds(window);
        let bucket = self.bucket_key(key, start);
        let mut conn = self.conn.clone();

        // TTL runs one second past the boundary so a racing read never sees
        // a key the boundary math still considers live.
        let ttl_secs = window.as_secs().max(1) + 1;

        let count: u64 = tokio::time::timeout(
            self.op_timeout,
            self.script
                .key(&bucket)
                .arg(ttl_secs)
                .invoke_async(&mut conn),
        )
        .await
        .map_err(|_| StoreError::Timeout(self.op_timeout))?
        .map_err(|e| StoreError::Operation(e.to_string()))?;

        debug!(key = %bucket, count, "Incremented shared counter");

        Ok(WindowUsage {
            count,
            resets_at: reset_time(end),
        })
    }

    async fn peek(&self, key: &str, window: Duration) -> Result<WindowUsage, StoreError> {
        let (start, end) = window_bounds(window);
        let bucket = self.bucket_key(key, start);
        let mut conn = self.conn.clone();

        let count: Option<u64> = tokio::time::timeout(
            self.op_timeout,
            redis::cmd("GET").arg(&bucket).query_async(&mut conn),
        )
        .await
        .map_err(|_| StoreError::Timeout(self.op_timeout))?
        .map_err(|e| StoreError::Operation(e.to_string()))?;

        Ok(WindowUsage {
            count: count.unwrap_or(0),
            resets_at: reset_time(end),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        // Nothing listens on this port; the connection attempt must fail
        // without hanging past the operation timeout.
        let result = SharedStore::connect(
            "redis://127.0.0.1:1/",
            "turnstile:",
            Duration::from_millis(200),
        )
        .await;

        assert!(matches!(
            result,
            Err(StoreError::Connection(_)) | Err(StoreError::Timeout(_))
        ));
    }
}
