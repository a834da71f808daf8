//! Store selection with shared-store failover.
//!
//! The shared store is authoritative when configured and healthy. Any
//! failure marks it unhealthy, serves the call from the local store, and
//! starts a single background probe that reconnects with bounded
//! exponential backoff. Neither startup nor request handling ever fails on
//! store connectivity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, warn};

use super::{CounterStore, LocalStore, SharedStore, StoreError, WindowUsage};

/// How often abandoned local entries are swept.
const PURGE_INTERVAL: Duration = Duration::from_secs(600);

/// Settings for store selection and reconnection.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Address of the shared store; `None` selects the local fallback only.
    pub shared_url: Option<String>,
    /// Prefix for keys written to the shared store.
    pub key_prefix: String,
    /// Per-operation timeout.
    pub op_timeout: Duration,
    /// Initial reconnect delay.
    pub reconnect_base: Duration,
    /// Reconnect delay ceiling.
    pub reconnect_max: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            shared_url: None,
            key_prefix: "turnstile:".to_string(),
            op_timeout: Duration::from_millis(250),
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

/// Counter store that prefers the shared implementation and degrades to the
/// local one.
pub struct FailoverStore {
    shared: Arc<Mutex<Option<Arc<SharedStore>>>>,
    local: LocalStore,
    shared_healthy: Arc<AtomicBool>,
    probe_running: Arc<AtomicBool>,
    settings: StoreSettings,
}

impl FailoverStore {
    /// Build the store, attempting the shared connection when configured.
    ///
    /// A failed or absent shared store is non-fatal: the local fallback
    /// serves immediately and reconnection proceeds in the background.
    pub async fn connect(settings: StoreSettings) -> Arc<Self> {
        let shared = match &settings.shared_url {
            Some(url) => {
                match SharedStore::connect(url, &settings.key_prefix, settings.op_timeout).await {
                    Ok(store) => Some(Arc::new(store)),
                    Err(e) => {
                        warn!(
                            error = %e,
                            "Shared counter store unreachable, serving from local fallback"
                        );
                        None
                    }
                }
            }
            None => {
                warn!("No shared counter store configured, budgets are per-instance");
                None
            }
        };

        let healthy = shared.is_some();
        let store = Arc::new(Self {
            shared: Arc::new(Mutex::new(shared)),
            local: LocalStore::new(),
            shared_healthy: Arc::new(AtomicBool::new(healthy)),
            probe_running: Arc::new(AtomicBool::new(false)),
            settings,
        });

        if store.settings.shared_url.is_some() && !healthy {
            store.spawn_probe();
        }
        store.spawn_purge_task();

        store
    }

    /// Whether the shared store is currently serving requests.
    pub fn shared_healthy(&self) -> bool {
        self.shared_healthy.load(Ordering::Relaxed)
    }

    fn current_shared(&self) -> Option<Arc<SharedStore>> {
        self.shared.lock().clone()
    }

    fn mark_unhealthy(&self) {
        if self.shared_healthy.swap(false, Ordering::Relaxed) {
            warn!("Shared counter store marked unhealthy, falling back to local budgets");
        }
        self.spawn_probe();
    }

    /// Reconnect with bounded exponential backoff and jitter. At most one
    /// probe runs at a time.
    fn spawn_probe(&self) {
        let Some(url) = self.settings.shared_url.clone() else {
            return;
        };
        if self.probe_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let key_prefix = self.settings.key_prefix.clone();
        let op_timeout = self.settings.op_timeout;
        let max_delay = self.settings.reconnect_max;
        let mut delay = self.settings.reconnect_base;

        let shared = self.shared.clone();
        let healthy = self.shared_healthy.clone();
        let probing = self.probe_running.clone();

        tokio::spawn(async move {
            loop {
                let jitter_ms = {
                    let mut rng = rand::thread_rng();
                    rng.gen_range(0..=(delay.as_millis() as u64) / 4)
                };
                tokio::time::sleep(delay + Duration::from_millis(jitter_ms)).await;

                match SharedStore::connect(&url, &key_prefix, op_timeout).await {
                    Ok(store) => match store.ping().await {
                        Ok(()) => {
                            *shared.lock() = Some(Arc::new(store));
                            healthy.store(true, Ordering::Relaxed);
                            probing.store(false, Ordering::SeqCst);
                            info!("Shared counter store connection restored");
                            return;
                        }
                        Err(e) => {
                            debug!(error = %e, "Shared store probe ping failed");
                        }
                    },
                    Err(e) => {
                        debug!(error = %e, "Shared store probe failed");
                    }
                }

                delay = (delay * 2).min(max_delay);
            }
        });
    }

    fn spawn_purge_task(&self) {
        let local = self.local.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PURGE_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                local.purge_expired();
                debug!("Purged expired local counter entries");
            }
        });
    }
}

#[async_trait]
impl CounterStore for FailoverStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowUsage, StoreError> {
        if self.shared_healthy() {
            if let Some(shared) = self.current_shared() {
                match shared.increment(key, window).await {
                    Ok(usage) => return Ok(usage),
                    Err(e) => {
                        warn!(error = %e, key = %key, "Shared store increment failed");
                        self.mark_unhealthy();
                    }
                }
            }
        }
        self.local.increment(key, window).await
    }

    async fn peek(&self, key: &str, window: Duration) -> Result<WindowUsage, StoreError> {
        if self.shared_healthy() {
            if let Some(shared) = self.current_shared() {
                match shared.peek(key, window).await {
                    Ok(usage) => return Ok(usage),
                    Err(e) => {
                        warn!(error = %e, key = %key, "Shared store peek failed");
                        self.mark_unhealthy();
                    }
                }
            }
        }
        self.local.peek(key, window).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_no_shared_url_serves_locally() {
        let store = FailoverStore::connect(StoreSettings::default()).await;

        assert!(!store.shared_healthy());

        let usage = store.increment("user:a", WINDOW).await.unwrap();
        assert_eq!(usage.count, 1);
        let usage = store.increment("user:a", WINDOW).await.unwrap();
        assert_eq!(usage.count, 2);
    }

    #[tokio::test]
    async fn test_unreachable_shared_store_is_non_fatal() {
        let settings = StoreSettings {
            shared_url: Some("redis://127.0.0.1:1/".to_string()),
            op_timeout: Duration::from_millis(200),
            ..StoreSettings::default()
        };
        let store = FailoverStore::connect(settings).await;

        // Startup degraded but serving: counters come from the local store.
        assert!(!store.shared_healthy());
        let usage = store.increment("ip:10.0.0.1", WINDOW).await.unwrap();
        assert_eq!(usage.count, 1);

        let usage = store.peek("ip:10.0.0.1", WINDOW).await.unwrap();
        assert_eq!(usage.count, 1);
    }
}
