//! Read-only HTTP API.
//!
//! # Endpoints
//!
//! - `GET /status`                         – driver states, dispatch stats, entity counts
//! - `GET /entities/{entity_type}/{key}`   – point lookup of one entity

use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use omidx_core::entities::UnknownEntityType;
use omidx_core::store::StoreError;

use crate::state::AppState;

mod entities;
mod status;

/// Build the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(status::get_status))
        .route("/entities/{entity_type}/{key}", get(entities::get_entity))
}

/// Errors that can occur in API handlers.
#[derive(Debug)]
enum ApiError {
    /// The entity store failed.
    Store(StoreError),
    /// The path names no known entity type.
    UnknownEntityType(UnknownEntityType),
    /// No entity under that key.
    NotFound,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::Store(e) => {
                tracing::error!(error = %e, "API store error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
            ApiError::UnknownEntityType(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "entity not found").into_response(),
        }
    }
}
