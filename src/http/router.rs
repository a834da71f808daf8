//! Route groups for the API's endpoint classes.
//!
//! Each group gets the admission layer for its class. The handlers here are
//! mount points; the document-store-backed business handlers are wired in
//! by the application.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};

use crate::admission::{AdmissionEngine, EndpointClass, PolicyCatalog};

use super::middleware::AdmissionLayer;

/// Assemble the API router with one admission layer per endpoint class.
pub fn api_router(engine: Arc<AdmissionEngine>, catalog: &PolicyCatalog) -> Router {
    let layer = |class: EndpointClass| AdmissionLayer::new(engine.clone(), catalog.get(class).clone());

    let auth = Router::new()
        .route("/login", post(not_wired))
        .route("/register", post(not_wired))
        .layer(layer(EndpointClass::Authentication));

    let read = Router::new()
        .route("/profiles", get(not_wired))
        .route("/matches", get(not_wired))
        .layer(layer(EndpointClass::Read));

    let write = Router::new()
        .route("/profile", put(not_wired))
        .route("/swipes", post(not_wired))
        .layer(layer(EndpointClass::Write));

    let intensive = Router::new()
        .route("/discover", get(not_wired))
        .route("/photos", post(not_wired))
        .layer(layer(EndpointClass::ResourceIntensive));

    let messaging = Router::new()
        .route("/messages", post(not_wired))
        .layer(layer(EndpointClass::Messaging));

    let notifications = Router::new()
        .route("/notifications", get(not_wired))
        .layer(layer(EndpointClass::Notifications));

    let public = Router::new()
        .route("/app-config", get(not_wired))
        .layer(layer(EndpointClass::Public));

    let admin = Router::new()
        .route("/reports", get(not_wired))
        .layer(layer(EndpointClass::Administrative));

    Router::new()
        .route("/health", get(health))
        .nest("/auth", auth)
        .nest(
            "/api",
            read.merge(write)
                .merge(intensive)
                .merge(messaging)
                .merge(notifications),
        )
        .nest("/public", public)
        .nest("/admin", admin)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn not_wired() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(serde_json::json!({ "error": "endpoint not wired" })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::NoBypass;
    use crate::store::LocalStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let engine = Arc::new(AdmissionEngine::new(
            Arc::new(LocalStore::new()),
            Arc::new(NoBypass),
            "x-forwarded-for",
        ));
        api_router(engine, &PolicyCatalog::builtin())
    }

    #[tokio::test]
    async fn test_health_is_not_throttled() {
        let app = test_router();

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
    }

    #[tokio::test]
    async fn test_public_route_carries_public_quota() {
        let app = test_router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/public/app-config")
                    .header("x-forwarded-for", "10.0.0.1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()["x-ratelimit-limit"], "50");
    }

    #[tokio::test]
    async fn test_read_route_carries_read_quota() {
        let app = test_router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/profiles")
                    .header("x-forwarded-for", "10.0.0.1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()["x-ratelimit-limit"], "300");
    }
}
