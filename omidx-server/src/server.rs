//! Axum server setup and router configuration.

use crate::shutdown::wait_for_shutdown;
use crate::state::AppState;
use axum::{Json, Router, response::IntoResponse, routing::get};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Build the main application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/health", get(health_check))
        .merge(crate::api::router())
        // Add state to all routes
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Simple health check - returns OK if the server is running.
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Run the server until `shutdown_rx` flips to `true`.
pub async fn run_server(
    router: Router,
    addr: SocketAddr,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use omidx_core::entities::ThumbnailMapping;
    use omidx_core::store::EntityStore;
    use omidx_core::testing::{hex, omen_dispatch_table};
    use omidx_sdk::objects::Provenance;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn state() -> AppState {
        let store = EntityStore::in_memory();
        let mapping = ThumbnailMapping {
            image_hash: Some(hex("0xdeadbeef")),
            ..ThumbnailMapping::new(hex("0xabcdef"))
        };
        store
            .save(&Provenance::new(100, 1, 0), &mapping)
            .await
            .unwrap();
        AppState::new(store, Arc::new(omen_dispatch_table()), Vec::new())
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_entity_lookup() {
        let router = build_router(state().await);

        let (status, body) = get(router.clone(), "/entities/ThumbnailMapping/0xABCDEF").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["entityType"], "ThumbnailMapping");
        assert_eq!(json["id"], "0xabcdef");
        assert_eq!(json["image_hash"], "0xdeadbeef");

        let (status, _) = get(router.clone(), "/entities/ThumbnailMapping/0x01").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get(router, "/entities/Order/0x01").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_reports_entity_counts() {
        let router = build_router(state().await);
        let (status, body) = get(router, "/status").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["entities"]["ThumbnailMapping"], 1);
        assert_eq!(json["entities"]["PredictionAdded"], 0);
        assert_eq!(json["dispatch"]["unmatched"], 0);
        assert!(json["drivers"].as_array().unwrap().is_empty());
    }
}
