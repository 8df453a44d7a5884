use axum::{extract::State, http::StatusCode, Json};
use service_core::error::AppError;

use crate::dtos::ListResponse;
use crate::models::{AccessRequest, Challenge};
use crate::startup::AppState;
use crate::utils::ValidatedJson;

/// Evaluates an access request: 200 when granted, 403 when denied.
/// The recorded challenge is returned either way.
pub async fn create_challenge(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<AccessRequest>,
) -> Result<(StatusCode, Json<Challenge>), AppError> {
    let challenge = state.service.evaluate(request).await?;
    let status = if challenge.granted {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    };
    Ok((status, Json(challenge)))
}

pub async fn list_challenges(
    State(state): State<AppState>,
) -> Result<Json<ListResponse<Challenge>>, AppError> {
    Ok(Json(state.service.list_challenges().await?.into()))
}
