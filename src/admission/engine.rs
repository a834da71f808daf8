//! Admission decision engine.

use std::net::IpAddr;
use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::store::{CounterStore, WindowUsage};

use super::bypass::BypassDirectory;
use super::key::{derive_key, Principal, ThrottleKey};
use super::policy::{CountMode, Policy};

/// Outcome of one admission check.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Whether the request may proceed to business logic
    pub allowed: bool,
    /// Whether a privileged principal skipped the counter check
    pub bypassed: bool,
    /// The policy's quota
    pub limit: u32,
    /// Requests counted against the window so far
    pub current: u64,
    /// Budget left in the window
    pub remaining: u64,
    /// When the window resets
    pub resets_at: DateTime<Utc>,
    /// The throttling key, absent for bypassed and fail-open decisions
    pub key: Option<ThrottleKey>,
}

impl Decision {
    fn from_usage(policy: &Policy, usage: WindowUsage, allowed: bool, key: ThrottleKey) -> Self {
        let limit = u64::from(policy.max_requests);
        Self {
            allowed,
            bypassed: false,
            limit: policy.max_requests,
            current: usage.count,
            remaining: limit.saturating_sub(usage.count),
            resets_at: usage.resets_at,
            key: Some(key),
        }
    }

    fn bypass(policy: &Policy) -> Self {
        Self {
            allowed: true,
            bypassed: true,
            limit: policy.max_requests,
            current: 0,
            remaining: u64::from(policy.max_requests),
            resets_at: Utc::now() + policy.window,
            key: None,
        }
    }

    /// Allow with optimistic metadata when the store cannot answer. The
    /// true count is unknown during an outage; availability wins.
    fn fail_open(policy: &Policy) -> Self {
        Self {
            allowed: true,
            bypassed: false,
            limit: policy.max_requests,
            current: 0,
            remaining: u64::from(policy.max_requests),
            resets_at: Utc::now() + policy.window,
            key: None,
        }
    }

    /// Whole seconds until the window resets, at least one.
    pub fn retry_after_secs(&self) -> u64 {
        (self.resets_at - Utc::now()).num_seconds().max(1) as u64
    }
}

/// Decides allow/deny per request against a policy, a key, and the counter
/// store.
pub struct AdmissionEngine {
    store: Arc<dyn CounterStore>,
    bypass: Arc<dyn BypassDirectory>,
    forwarded_header: String,
}

impl AdmissionEngine {
    pub fn new(
        store: Arc<dyn CounterStore>,
        bypass: Arc<dyn BypassDirectory>,
        forwarded_header: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bypass,
            forwarded_header: forwarded_header.into(),
        }
    }

    /// Run the admission check for one request.
    ///
    /// Never fails: store errors admit the request (the store reconnects in
    /// the background), bypass-lookup errors deny the exemption. The two
    /// error paths are deliberately asymmetric.
    pub async fn admit(
        &self,
        policy: &Policy,
        principal: Option<&Principal>,
        headers: &HeaderMap,
        peer_addr: Option<IpAddr>,
    ) -> Decision {
        if let Some(principal) = principal {
            match self.bypass.is_exempt(&principal.id).await {
                Ok(true) => {
                    debug!(
                        principal = %principal.id,
                        policy = policy.name,
                        "Principal exempt from admission control"
                    );
                    return Decision::bypass(policy);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        error = %e,
                        principal = %principal.id,
                        "Bypass lookup failed, treating principal as not exempt"
                    );
                }
            }
        }

        let key = derive_key(
            policy.key_strategy,
            principal,
            headers,
            peer_addr,
            &self.forwarded_header,
        );

        // Failures-only policies consume budget on the response path, so
        // admission reads the window without incrementing it.
        let result = if policy.count_mode.counts_on_admit() {
            self.store.increment(key.as_str(), policy.window).await
        } else {
            self.store.peek(key.as_str(), policy.window).await
        };

        let usage = match result {
            Ok(usage) => usage,
            Err(e) => {
                warn!(
                    error = %e,
                    key = %key,
                    policy = policy.name,
                    "Counter store unavailable, admitting request"
                );
                return Decision::fail_open(policy);
            }
        };

        let limit = u64::from(policy.max_requests);
        let allowed = if policy.count_mode.counts_on_admit() {
            usage.count <= limit
        } else {
            // The peeked count excludes the request in flight.
            usage.count < limit
        };

        if !allowed {
            debug!(
                key = %key,
                policy = policy.name,
                count = usage.count,
                limit = policy.max_requests,
                "Admission denied, quota exhausted"
            );
        }

        Decision::from_usage(policy, usage, allowed, key)
    }

    /// Response-path accounting for policies that only count failures.
    pub async fn record_outcome(&self, policy: &Policy, key: &ThrottleKey, status: u16) {
        if policy.count_mode.counts_on_admit() {
            return;
        }
        if !policy.count_mode.consumes_budget(status) {
            return;
        }

        if let Err(e) = self.store.increment(key.as_str(), policy.window).await {
            warn!(
                error = %e,
                key = %key,
                policy = policy.name,
                "Failed to record attempt against window"
            );
        }
    }
}
