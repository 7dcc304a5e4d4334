use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use omidx_core::entities::EntityType;
use omidx_core::key::{EntityKey, derive_domain_key_str};

use super::ApiError;
use crate::state::AppState;

/// `GET /entities/{entity_type}/{key}`: fetch one entity.
///
/// Hex keys are normalized first, so a market address matches in any case.
pub(super) async fn get_entity(
    state: State<AppState>,
    Path((entity_type, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let entity_type: EntityType = entity_type.parse().map_err(ApiError::UnknownEntityType)?;
    let key = if key.starts_with("0x") || key.starts_with("0X") {
        derive_domain_key_str(&key).unwrap_or_else(|_| EntityKey::new(key.as_str()))
    } else {
        EntityKey::new(key.as_str())
    };

    let entity = state
        .store
        .load_any(entity_type, &key)
        .await
        .map_err(ApiError::Store)?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(entity))
}
