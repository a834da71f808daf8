//! Client-side protocol cooperating with the admission layer.
//!
//! A rejection signaling a stale credential (403) triggers exactly one
//! forced refresh and resend; quota rejections (429) surface immediately
//! with their retry hint and are never retried here.

mod credentials;
mod retry;
mod transport;

pub use credentials::CredentialSource;
pub use retry::RetryCoordinator;
pub use transport::{ApiRequest, ApiResponse, Dispatch, ReqwestDispatcher};

use thiserror::Error;

/// Errors surfaced to callers of the retry coordinator.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The call's quota was exhausted; wait `retry_after` seconds.
    #[error("quota exceeded, retry after {retry_after}s")]
    QuotaExceeded { retry_after: u64 },

    /// The credential was rejected again after a forced refresh.
    #[error("credential rejected after forced refresh")]
    CredentialRejected,

    /// No credential was presented or accepted at all.
    #[error("request was unauthenticated")]
    MissingCredential,

    /// The identity provider could not mint a token.
    #[error("credential refresh failed: {0}")]
    Refresh(String),

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
