//! Single-attempt HTTP dispatch.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use super::ClientError;

/// One logical API call, replayable across attempts.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            body: Some(body),
        }
    }
}

/// The parts of a response the retry coordinator inspects.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed `Retry-After` header, when present
    pub retry_after: Option<u64>,
    pub body: Value,
}

/// A single network attempt. Retries live above this seam.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, request: &ApiRequest, bearer: &str) -> Result<ApiResponse, ClientError>;
}

/// Production dispatcher over a shared reqwest client.
pub struct ReqwestDispatcher {
    client: reqwest::Client,
}

impl ReqwestDispatcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Dispatch for ReqwestDispatcher {
    async fn dispatch(&self, request: &ApiRequest, bearer: &str) -> Result<ApiResponse, ClientError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.as_str())
            .bearer_auth(bearer);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok());
        let body = response.json::<Value>().await.unwrap_or(Value::Null);

        Ok(ApiResponse {
            status,
            retry_after,
            body,
        })
    }
}
