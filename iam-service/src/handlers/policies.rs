use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::dtos::ListResponse;
use crate::models::{Policy, PolicyDraft};
use crate::startup::AppState;
use crate::utils::ValidatedJson;

pub async fn create_policy(
    State(state): State<AppState>,
    ValidatedJson(draft): ValidatedJson<PolicyDraft>,
) -> Result<(StatusCode, Json<Policy>), AppError> {
    let policy = state.service.create_policy(draft).await?;
    Ok((StatusCode::CREATED, Json(policy)))
}

pub async fn list_policies(
    State(state): State<AppState>,
) -> Result<Json<ListResponse<Policy>>, AppError> {
    Ok(Json(state.service.list_policies().await?.into()))
}

pub async fn get_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Policy>, AppError> {
    Ok(Json(state.service.get_policy(&id).await?))
}

pub async fn delete_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Policy>, AppError> {
    tracing::info!(policy = %id, "Deleting policy");
    Ok(Json(state.service.delete_policy(&id).await?))
}
