use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::dtos::ListResponse;
use crate::models::{Group, GroupDraft, MembershipChange};
use crate::startup::AppState;
use crate::utils::ValidatedJson;

pub async fn create_group(
    State(state): State<AppState>,
    ValidatedJson(draft): ValidatedJson<GroupDraft>,
) -> Result<(StatusCode, Json<Group>), AppError> {
    let group = state.service.create_group(draft).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn list_groups(
    State(state): State<AppState>,
) -> Result<Json<ListResponse<Group>>, AppError> {
    Ok(Json(state.service.list_groups().await?.into()))
}

pub async fn get_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Group>, AppError> {
    Ok(Json(state.service.get_group(&id).await?))
}

pub async fn delete_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Group>, AppError> {
    tracing::info!(group = %id, "Deleting group");
    Ok(Json(state.service.delete_group(&id).await?))
}

pub async fn add_members(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidatedJson(change): ValidatedJson<MembershipChange>,
) -> Result<Json<Group>, AppError> {
    Ok(Json(
        state
            .service
            .add_group_members(&id, &change.members)
            .await?,
    ))
}

pub async fn remove_members(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidatedJson(change): ValidatedJson<MembershipChange>,
) -> Result<Json<Group>, AppError> {
    Ok(Json(
        state
            .service
            .remove_group_members(&id, &change.members)
            .await?,
    ))
}
