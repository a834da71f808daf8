//! Privileged-identity bypass lookup.

use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur during a bypass lookup.
#[derive(Debug, Error)]
pub enum BypassError {
    #[error("bypass directory unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of the externally maintained privileged-identity set.
///
/// Consulted per request and never cached by the engine, so membership
/// changes take effect immediately. On lookup failure the engine treats the
/// principal as not exempt.
#[async_trait]
pub trait BypassDirectory: Send + Sync {
    /// Whether the principal is exempt from admission control.
    async fn is_exempt(&self, principal_id: &str) -> Result<bool, BypassError>;
}

/// Directory that exempts no one.
pub struct NoBypass;

#[async_trait]
impl BypassDirectory for NoBypass {
    async fn is_exempt(&self, _principal_id: &str) -> Result<bool, BypassError> {
        Ok(false)
    }
}

/// Fixed in-memory set of privileged principal identifiers, for deployments
/// without a directory service.
pub struct StaticBypassSet {
    ids: HashSet<String>,
}

impl StaticBypassSet {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl BypassDirectory for StaticBypassSet {
    async fn is_exempt(&self, principal_id: &str) -> Result<bool, BypassError> {
        Ok(self.ids.contains(principal_id))
    }
}
