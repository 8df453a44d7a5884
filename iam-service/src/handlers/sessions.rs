use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use service_core::error::AppError;

use crate::dtos::LogoutResponse;
use crate::services::{Session, SessionClaims};
use crate::startup::AppState;

pub async fn start_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Session>), AppError> {
    let session = state.sessions.start_session(&id).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn logout(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<LogoutResponse>, AppError> {
    state.sessions.end_session(bearer.token()).await?;
    Ok(Json(LogoutResponse { logged_out: true }))
}

/// Returns the claims of a live session token.
pub async fn inspect(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<SessionClaims>, AppError> {
    let claims = state.sessions.verify(bearer.token()).await?;
    Ok(Json(claims))
}
