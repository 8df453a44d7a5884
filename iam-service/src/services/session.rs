//! Session tokens for users.
//!
//! The identity provider handshake happens elsewhere; this only mints and
//! revokes the tokens stored on the user record.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::clock::IdGenerator;
use super::error::ServiceError;
use super::repository::Repository;
use crate::config::SessionConfig;
use crate::models::{EntityKind, User, USER_ACCESS_TOKEN_FIELD, USER_REFRESH_TOKEN_FIELD};

/// Separator for group ids inside the `groups` claim.
const GROUP_SEPARATOR: &str = ";";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (user ID)
    pub sub: String,
    pub aud: String,
    pub role: String,
    /// Group ids joined by `;`
    pub groups: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

impl SessionClaims {
    pub fn group_ids(&self) -> Vec<&str> {
        self.groups
            .split(GROUP_SEPARATOR)
            .filter(|g| !g.is_empty())
            .collect()
    }
}

/// Token response returned to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct SessionService {
    repo: Repository,
    ids: Arc<dyn IdGenerator>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    audience: String,
    ttl_hours: i64,
}

impl SessionService {
    pub fn new(repo: Repository, ids: Arc<dyn IdGenerator>, config: &SessionConfig) -> Self {
        let secret = config.jwt_secret.expose_secret().as_bytes();
        Self {
            repo,
            ids,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            audience: config.audience.clone(),
            ttl_hours: config.ttl_hours,
        }
    }

    /// Issues a token pair for the user and stores it on the user record.
    #[tracing::instrument(skip(self))]
    pub async fn start_session(&self, user_id: &str) -> Result<Session, ServiceError> {
        let user: User = self.repo.get(user_id).await.map_err(|e| {
            if e.is_not_found() {
                ServiceError::not_found(EntityKind::User, user_id)
            } else {
                ServiceError::Store(e)
            }
        })?;

        let now = Utc::now();
        let exp = now + Duration::hours(self.ttl_hours);
        let claims = SessionClaims {
            sub: user.id.clone(),
            aud: self.audience.clone(),
            role: user.role.clone(),
            groups: user
                .groups
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(GROUP_SEPARATOR),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: self.ids.next_id(),
        };

        let access_token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        let refresh_token = self.ids.next_id();

        let store = self.repo.store();
        store
            .set_field(
                EntityKind::User,
                &user.id,
                USER_ACCESS_TOKEN_FIELD,
                Some(&access_token),
            )
            .await?;
        store
            .set_field(
                EntityKind::User,
                &user.id,
                USER_REFRESH_TOKEN_FIELD,
                Some(&refresh_token),
            )
            .await?;

        tracing::info!(user = %user.id, "Session started");
        Ok(Session {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.ttl_hours * 3600,
        })
    }

    /// Introspects `token`: it must be signed by us, unexpired, and still the
    /// active token stored on its user.
    #[tracing::instrument(skip(self, token))]
    pub async fn verify(&self, token: &str) -> Result<SessionClaims, ServiceError> {
        let claims = self.decode(token, true)?;
        self.active_user(&claims, token).await?;
        Ok(claims)
    }

    /// Clears the session holding `token`. Expired tokens can still log out.
    #[tracing::instrument(skip(self, token))]
    pub async fn end_session(&self, token: &str) -> Result<(), ServiceError> {
        let claims = self.decode(token, false)?;
        let user = self.active_user(&claims, token).await?;

        let store = self.repo.store();
        store
            .clear_field(EntityKind::User, &user.id, USER_ACCESS_TOKEN_FIELD)
            .await?;
        store
            .clear_field(EntityKind::User, &user.id, USER_REFRESH_TOKEN_FIELD)
            .await?;

        tracing::info!(user = %user.id, "Session ended");
        Ok(())
    }

    async fn active_user(&self, claims: &SessionClaims, token: &str) -> Result<User, ServiceError> {
        let user: User = self.repo.get(&claims.sub).await.map_err(|e| {
            if e.is_not_found() {
                ServiceError::Session("session user no longer exists".to_string())
            } else {
                ServiceError::Store(e)
            }
        })?;

        if user.access_token.as_deref() != Some(token) {
            return Err(ServiceError::Session("session is not active".to_string()));
        }
        Ok(user)
    }

    fn decode(
        &self,
        token: &str,
        check_expiry: bool,
    ) -> Result<SessionClaims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[self.audience.as_str()]);
        validation.validate_exp = check_expiry;
        Ok(decode::<SessionClaims>(token, &self.decoding_key, &validation)?.claims)
    }
}
