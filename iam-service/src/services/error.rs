use service_core::error::AppError;
use thiserror::Error;

use super::evaluator::EvalError;
use super::graph::GraphError;
use crate::models::EntityKind;
use crate::store::StoreError;

/// Seconds a client should wait before retrying after a store outage.
const RETRY_AFTER_SECS: u64 = 5;

/// Failure classes shared by every layer; the transport picks a status from these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    DuplicateId,
    GraphInconsistency,
    StoreUnavailable,
    Timeout,
    /// A stored document could not be decoded; retrying reads the same bytes.
    CorruptData,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::GraphInconsistency | ErrorKind::StoreUnavailable | ErrorKind::Timeout
        )
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(#[from] validator::ValidationErrors),

    #[error("{kind} `{id}` not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("principal `{0}` is neither a user nor a group")]
    UnknownPrincipal(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

impl ServiceError {
    pub fn not_found(kind: EntityKind, id: &str) -> Self {
        ServiceError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Validation(_)
            | ServiceError::InvalidInput(_)
            | ServiceError::Session(_)
            | ServiceError::InvalidToken(_) => ErrorKind::Validation,
            ServiceError::NotFound { .. } | ServiceError::UnknownPrincipal(_) => {
                ErrorKind::NotFound
            }
            ServiceError::Conflict(_) => ErrorKind::DuplicateId,
            ServiceError::Graph(e) => e.kind(),
            ServiceError::Eval(e) => e.kind(),
            ServiceError::Store(e) => e.kind(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidInput(e) => AppError::ValidationError(e),
            ServiceError::InvalidToken(e) => AppError::InvalidToken(e),
            ServiceError::Session(msg) => AppError::Unauthorized(anyhow::anyhow!(msg)),
            other => {
                let message = other.to_string();
                match other.kind() {
                    ErrorKind::Validation => AppError::Unprocessable(anyhow::anyhow!(message)),
                    ErrorKind::NotFound => AppError::NotFound(anyhow::anyhow!(message)),
                    ErrorKind::DuplicateId => AppError::Conflict(anyhow::anyhow!(message)),
                    ErrorKind::GraphInconsistency => {
                        AppError::Inconsistent(anyhow::anyhow!(message))
                    }
                    ErrorKind::Timeout => AppError::GatewayTimeout(anyhow::anyhow!(message)),
                    ErrorKind::StoreUnavailable => {
                        tracing::warn!(error = %message, "Store unavailable");
                        AppError::ServiceUnavailable(Some(RETRY_AFTER_SECS))
                    }
                    ErrorKind::CorruptData => AppError::InternalError(anyhow::anyhow!(message)),
                }
            }
        }
    }
}
