//! Admission middleware.
//!
//! One [`AdmissionLayer`] is applied per endpoint class. Every response
//! from a throttled route carries rate-limit bookkeeping headers so clients
//! can self-pace; denials short-circuit with a structured 429 before
//! business logic runs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap, HeaderValue, Request, Response, StatusCode};
use futures::future::BoxFuture;
use tower::{Layer, Service};

use crate::admission::{AdmissionEngine, Decision, Policy, Principal};

/// Applies one endpoint class's admission policy to every request.
#[derive(Clone)]
pub struct AdmissionLayer {
    engine: Arc<AdmissionEngine>,
    policy: Arc<Policy>,
}

impl AdmissionLayer {
    pub fn new(engine: Arc<AdmissionEngine>, policy: Policy) -> Self {
        Self {
            engine,
            policy: Arc::new(policy),
        }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            engine: self.engine.clone(),
            policy: self.policy.clone(),
        }
    }
}

/// The per-request admission check wrapped around an inner service.
#[derive(Clone)]
pub struct AdmissionService<S> {
    inner: S,
    engine: Arc<AdmissionEngine>,
    policy: Arc<Policy>,
}

impl<S> Service<Request<Body>> for AdmissionService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let engine = self.engine.clone();
        let policy = self.policy.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let principal = request.extensions().get::<Principal>().cloned();
            let peer_addr = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip());

            let decision = engine
                .admit(&policy, principal.as_ref(), request.headers(), peer_addr)
                .await;

            if !decision.allowed {
                return Ok(reject(&decision));
            }

            let key = decision.key.clone();
            let mut response = inner.call(request).await?;
            stamp_rate_limit_headers(response.headers_mut(), &decision);

            if let Some(key) = key {
                engine
                    .record_outcome(&policy, &key, response.status().as_u16())
                    .await;
            }

            Ok(response)
        })
    }
}

/// Build the structured 429 rejection.
fn reject(decision: &Decision) -> Response<Body> {
    let retry_after = decision.retry_after_secs();
    let body = serde_json::json!({
        "error": "Too many requests, please slow down.",
        "retryAfter": retry_after,
    });

    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    stamp_rate_limit_headers(response.headers_mut(), decision);

    response
}

/// Expose the decision's bookkeeping on the response.
fn stamp_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    if let Ok(value) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("x-ratelimit-limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.resets_at.timestamp().to_string()) {
        headers.insert("x-ratelimit-reset", value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{CountMode, KeyStrategy, NoBypass};
    use crate::store::LocalStore;
    use axum::routing::{get, post};
    use axum::Router;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    fn engine() -> Arc<AdmissionEngine> {
        Arc::new(AdmissionEngine::new(
            Arc::new(LocalStore::new()),
            Arc::new(NoBypass),
            "x-forwarded-for",
        ))
    }

    fn origin_policy(max_requests: u32) -> Policy {
        Policy {
            name: "public",
            window: Duration::from_secs(900),
            max_requests,
            key_strategy: KeyStrategy::Origin,
            count_mode: CountMode::AllRequests,
        }
    }

    fn identity_policy(max_requests: u32) -> Policy {
        Policy {
            name: "read",
            window: Duration::from_secs(900),
            max_requests,
            key_strategy: KeyStrategy::Identity,
            count_mode: CountMode::AllRequests,
        }
    }

    fn auth_policy() -> Policy {
        Policy {
            name: "authentication",
            window: Duration::from_secs(900),
            max_requests: 5,
            key_strategy: KeyStrategy::Origin,
            count_mode: CountMode::FailuresOnly { success_below: 400 },
        }
    }

    fn request(path: &str, addr: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header("x-forwarded-for", addr)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_allowed_response_carries_rate_limit_headers() {
        let app = Router::new()
            .route("/profiles", get(|| async { "ok" }))
            .layer(AdmissionLayer::new(engine(), origin_policy(10)));

        let response = app.oneshot(request("/profiles", "10.0.0.1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "10");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "9");
        assert!(response.headers().contains_key("x-ratelimit-reset"));
    }

    #[tokio::test]
    async fn test_over_quota_rejected_with_429() {
        let app = Router::new()
            .route("/profiles", get(|| async { "ok" }))
            .layer(AdmissionLayer::new(engine(), origin_policy(2)));

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(request("/profiles", "10.0.0.1"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.oneshot(request("/profiles", "10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        assert!(response.headers().contains_key("retry-after"));

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].is_string());
        assert!(body["retryAfter"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_distinct_origins_have_independent_budgets() {
        let app = Router::new()
            .route("/profiles", get(|| async { "ok" }))
            .layer(AdmissionLayer::new(engine(), origin_policy(1)));

        let response = app
            .clone()
            .oneshot(request("/profiles", "10.0.0.1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(request("/profiles", "10.0.0.1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = app.oneshot(request("/profiles", "10.0.0.2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_identity_key_pools_by_principal() {
        let app = Router::new()
            .route("/matches", get(|| async { "ok" }))
            .layer(AdmissionLayer::new(engine(), identity_policy(1)));

        let with_principal = |id: &str| {
            Request::builder()
                .uri("/matches")
                .header("x-forwarded-for", "10.0.0.1")
                .extension(Principal::new(id))
                .body(Body::empty())
                .unwrap()
        };

        // Same address, different principals: independent budgets.
        let response = app.clone().oneshot(with_principal("alice")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(with_principal("alice")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = app.oneshot(with_principal("bob")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_failed_sign_ins_consume_budget() {
        let app = Router::new()
            .route(
                "/login",
                post(|| async { (StatusCode::UNAUTHORIZED, "bad credentials") }),
            )
            .layer(AdmissionLayer::new(engine(), auth_policy()));

        let attempt = || {
            Request::builder()
                .method("POST")
                .uri("/login")
                .header("x-forwarded-for", "10.0.0.1")
                .body(Body::empty())
                .unwrap()
        };

        // Five failed attempts fail on their own merits.
        for _ in 0..5 {
            let response = app.clone().oneshot(attempt()).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        // The sixth is denied before the handler runs.
        let response = app.oneshot(attempt()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_successful_sign_ins_do_not_consume_budget() {
        let app = Router::new()
            .route("/login", post(|| async { (StatusCode::OK, "welcome") }))
            .layer(AdmissionLayer::new(engine(), auth_policy()));

        for _ in 0..10 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/login")
                        .header("x-forwarded-for", "10.0.0.1")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
