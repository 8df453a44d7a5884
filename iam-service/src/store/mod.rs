//! Entity Store adapter.
//!
//! Every entity kind lives in one document collection, keyed by `@id` and
//! discriminated by `@type`. Operations are individually atomic on a single
//! document; there is no multi-document transaction, which is why the graph
//! layer records compensations for its multi-step sequences.

pub mod filter;
pub mod memory;
pub mod mongo;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use mongodb::bson::Document;
use std::time::Duration;
use thiserror::Error;

use crate::models::{DecodeError, EntityKind};
use crate::services::error::ErrorKind;

pub use filter::Filter;
pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Ceiling applied to every store round trip unless configured otherwise.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(20);

/// Set mutation applied atomically to an array field of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    AddToSet,
    Pull,
}

impl SetOp {
    pub(crate) fn operator(self) -> &'static str {
        match self {
            SetOp::AddToSet => "$addToSet",
            SetOp::Pull => "$pull",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no document matches `{0}`")]
    NotFound(String),

    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("store operation `{operation}` timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Duplicate(_) => ErrorKind::DuplicateId,
            StoreError::Timeout { .. } => ErrorKind::Timeout,
            StoreError::Unavailable(_) => ErrorKind::StoreUnavailable,
            StoreError::Decode(_) => ErrorKind::CorruptData,
        }
    }

    /// Timeouts and connectivity failures are transient. A timeout does not
    /// mean the write was skipped; it may have landed server-side.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Timeout { .. } | StoreError::Unavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fails with `Duplicate` when the `@id` (or a user's email) is taken.
    async fn insert(&self, doc: Document) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Document, StoreError>;

    async fn find(&self, filter: &Filter) -> Result<Vec<Document>, StoreError>;

    /// Atomic set mutation on the document of `kind` with `id`; returns the
    /// updated document, or `NotFound` if no such document exists.
    async fn update_set(
        &self,
        kind: EntityKind,
        id: &str,
        field: &str,
        op: SetOp,
        value: &str,
    ) -> Result<Document, StoreError>;

    /// Applies the same set mutation to every matching document; returns the
    /// number of documents changed.
    async fn update_set_many(
        &self,
        filter: &Filter,
        field: &str,
        op: SetOp,
        value: &str,
    ) -> Result<u64, StoreError>;

    /// Sets a scalar field, or removes it when `value` is `None`.
    async fn set_field(
        &self,
        kind: EntityKind,
        id: &str,
        field: &str,
        value: Option<&str>,
    ) -> Result<Document, StoreError>;

    async fn clear_field(
        &self,
        kind: EntityKind,
        id: &str,
        field: &str,
    ) -> Result<Document, StoreError> {
        self.set_field(kind, id, field, None).await
    }

    async fn delete_by_id(&self, id: &str) -> Result<Document, StoreError>;

    async fn delete_many(&self, filter: &Filter) -> Result<u64, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
