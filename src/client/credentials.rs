//! Credential acquisition seam for the identity provider.

use async_trait::async_trait;

use super::ClientError;

/// Bearer-token acquisition against the identity provider.
///
/// The provider itself is a black box that can mint, verify, and
/// force-refresh tokens.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// The currently cached credential.
    async fn current(&self) -> Result<String, ClientError>;

    /// Mint a fresh credential, bypassing any local cache.
    async fn force_refresh(&self) -> Result<String, ClientError>;
}
