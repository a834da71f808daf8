//! Bounded refresh-and-retry state machine.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{ApiRequest, ApiResponse, ClientError, CredentialSource, Dispatch};

/// Where a logical call stands in its retry lifecycle.
enum CallState {
    /// First attempt, with the cached credential.
    Initial,
    /// Second and final attempt, with a freshly minted credential.
    RefreshedRetry,
    /// The call settled; nothing further is attempted.
    Done(Result<ApiResponse, ClientError>),
}

/// What one network attempt told us.
enum Attempt {
    /// The server rejected the credential as stale.
    StaleCredential,
    /// The attempt produced a final outcome for this state.
    Settled(Result<ApiResponse, ClientError>),
}

/// Drives one logical API call to completion with at most one
/// forced-refresh retry, regardless of how many times the credential
/// appears stale. At most two network attempts occur per call.
pub struct RetryCoordinator {
    dispatch: Arc<dyn Dispatch>,
    credentials: Arc<dyn CredentialSource>,
}

impl RetryCoordinator {
    pub fn new(dispatch: Arc<dyn Dispatch>, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            dispatch,
            credentials,
        }
    }

    /// Execute the call through the {Initial, RefreshedRetry, Done} states.
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let mut state = CallState::Initial;

        loop {
            state = match state {
                CallState::Initial => {
                    let bearer = self.credentials.current().await?;
                    match self.attempt(request, &bearer).await {
                        Attempt::StaleCredential => {
                            debug!(url = %request.url, "Credential rejected as stale, forcing refresh");
                            CallState::RefreshedRetry
                        }
                        Attempt::Settled(outcome) => CallState::Done(outcome),
                    }
                }
                CallState::RefreshedRetry => {
                    let bearer = self.credentials.force_refresh().await?;
                    match self.attempt(request, &bearer).await {
                        Attempt::StaleCredential => {
                            warn!(url = %request.url, "Credential rejected again after forced refresh");
                            CallState::Done(Err(ClientError::CredentialRejected))
                        }
                        Attempt::Settled(outcome) => CallState::Done(outcome),
                    }
                }
                CallState::Done(outcome) => return outcome,
            };
        }
    }

    async fn attempt(&self, request: &ApiRequest, bearer: &str) -> Attempt {
        let response = match self.dispatch.dispatch(request, bearer).await {
            Ok(response) => response,
            Err(e) => return Attempt::Settled(Err(e)),
        };

        match response.status {
            403 => Attempt::StaleCredential,
            401 => Attempt::Settled(Err(ClientError::MissingCredential)),
            429 => {
                let retry_after = response.retry_after.unwrap_or(1);
                debug!(
                    url = %request.url,
                    retry_after,
                    "Call rejected by admission control"
                );
                Attempt::Settled(Err(ClientError::QuotaExceeded { retry_after }))
            }
            _ => Attempt::Settled(Ok(response)),
        }
    }
}
