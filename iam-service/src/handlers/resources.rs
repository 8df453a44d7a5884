use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::dtos::ListResponse;
use crate::models::{Resource, ResourceDraft};
use crate::startup::AppState;
use crate::utils::ValidatedJson;

pub async fn create_resource(
    State(state): State<AppState>,
    ValidatedJson(draft): ValidatedJson<ResourceDraft>,
) -> Result<(StatusCode, Json<Resource>), AppError> {
    let resource = state.service.create_resource(draft).await?;
    Ok((StatusCode::CREATED, Json(resource)))
}

pub async fn list_resources(
    State(state): State<AppState>,
) -> Result<Json<ListResponse<Resource>>, AppError> {
    Ok(Json(state.service.list_resources().await?.into()))
}

pub async fn get_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Resource>, AppError> {
    Ok(Json(state.service.get_resource(&id).await?))
}

/// Deletes the resource together with every policy on it.
pub async fn delete_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Resource>, AppError> {
    tracing::info!(resource = %id, "Deleting resource");
    Ok(Json(state.service.delete_resource(&id).await?))
}
