use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use service_core::error::AppError;

use crate::dtos::ListResponse;
use crate::models::{Challenge, Policy, Resource, UserDraft, UserResponse};
use crate::startup::AppState;
use crate::utils::ValidatedJson;

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub email: Option<String>,
}

pub async fn create_user(
    State(state): State<AppState>,
    ValidatedJson(draft): ValidatedJson<UserDraft>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let user = state.service.create_user(draft).await?;
    Ok((StatusCode::CREATED, Json(user.sanitized())))
}

/// Lists users, or looks one up when `?email=` is given.
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<ListResponse<UserResponse>>, AppError> {
    let users = match query.email {
        Some(email) => vec![state.service.find_user_by_email(&email).await?],
        None => state.service.list_users().await?,
    };
    Ok(Json(
        users
            .iter()
            .map(|u| u.sanitized())
            .collect::<Vec<_>>()
            .into(),
    ))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.service.get_user(&id).await?;
    Ok(Json(user.sanitized()))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, AppError> {
    tracing::info!(user = %id, "Deleting user");
    let user = state.service.delete_user(&id).await?;
    Ok(Json(user.sanitized()))
}

pub async fn list_owned(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ListResponse<Resource>>, AppError> {
    let resources = state.service.list_owned_resources(&id).await?;
    Ok(Json(resources.into()))
}

pub async fn list_policies(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ListResponse<Policy>>, AppError> {
    let policies = state.service.list_user_policies(&id).await?;
    Ok(Json(policies.into()))
}

pub async fn list_challenges(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ListResponse<Challenge>>, AppError> {
    let challenges = state.service.list_user_challenges(&id).await?;
    Ok(Json(challenges.into()))
}

/// Everything the user can reach: owned resources plus Allow grants.
pub async fn list_access(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ListResponse<Resource>>, AppError> {
    let resources = state.service.list_user_access(&id).await?;
    Ok(Json(resources.into()))
}
