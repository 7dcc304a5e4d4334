use axum::{Json, extract::State, response::IntoResponse};
use omidx_core::dispatch::DispatchStats;
use omidx_core::entities::EntityType;
use omidx_core::replay::ReplayProgress;
use serde::Serialize;
use std::collections::BTreeMap;

use super::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DriverStatus {
    name: String,
    #[serde(flatten)]
    progress: ReplayProgress,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    drivers: Vec<DriverStatus>,
    dispatch: DispatchStats,
    entities: BTreeMap<&'static str, u64>,
}

/// `GET /status`: indexing progress.
pub(super) async fn get_status(state: State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let drivers = state
        .drivers
        .iter()
        .map(|handle| DriverStatus {
            name: handle.name.clone(),
            progress: *handle.progress.borrow(),
        })
        .collect();

    let mut entities = BTreeMap::new();
    for entity_type in EntityType::ALL {
        let count = state
            .store
            .entity_count(entity_type)
            .await
            .map_err(ApiError::Store)?;
        entities.insert(entity_type.name(), count);
    }

    Ok(Json(StatusResponse {
        drivers,
        dispatch: state.dispatch.stats(),
        entities,
    }))
}
