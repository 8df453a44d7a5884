use axum::{
    extract::{Request, State},
    http::{header::WWW_AUTHENTICATE, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use axum_extra::{
    headers::{authorization::Basic, Authorization},
    TypedHeader,
};
use secrecy::ExposeSecret;
use serde_json::json;
use subtle::ConstantTimeEq;

use crate::config::AdminConfig;
use crate::startup::AppState;

/// Both halves are compared in constant time.
fn credentials_match(config: &AdminConfig, basic: &Basic) -> bool {
    let user_ok = config.username.as_bytes().ct_eq(basic.username().as_bytes());
    let password_ok = config
        .password
        .expose_secret()
        .as_bytes()
        .ct_eq(basic.password().as_bytes());
    (user_ok & password_ok).into()
}

/// Guards operator-only routes with the configured Basic credential.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Basic>>>,
    request: Request,
    next: Next,
) -> Response {
    match auth {
        Some(TypedHeader(Authorization(basic))) if credentials_match(&state.config.admin, &basic) => {
            next.run(request).await
        }
        _ => {
            tracing::warn!(path = %request.uri().path(), "Failed admin authentication attempt");
            (
                StatusCode::UNAUTHORIZED,
                [(WWW_AUTHENTICATE, "Basic realm=\"iam-service\"")],
                Json(json!({ "error": "Unauthorized: admin credential required" })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn config() -> AdminConfig {
        AdminConfig {
            username: "operator".into(),
            password: Secret::new("hunter2".into()),
        }
    }

    fn basic(username: &str, password: &str) -> Basic {
        Authorization::basic(username, password).0
    }

    #[test]
    fn accepts_only_exact_credentials() {
        assert!(credentials_match(&config(), &basic("operator", "hunter2")));
        assert!(!credentials_match(&config(), &basic("operator", "hunter3")));
        assert!(!credentials_match(&config(), &basic("root", "hunter2")));
        assert!(!credentials_match(&config(), &basic("operator", "")));
    }
}
