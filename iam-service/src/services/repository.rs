use std::sync::Arc;

use crate::models::{DecodeError, Record};
use crate::store::{EntityStore, Filter, StoreError};

/// Typed access to the entity store for any `Record` kind.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn EntityStore>,
}

impl Repository {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn EntityStore {
        self.store.as_ref()
    }

    /// Loads `id` as an `R`. A document of another kind counts as absent.
    pub async fn get<R: Record>(&self, id: &str) -> Result<R, StoreError> {
        let doc = self.store.find_by_id(id).await?;
        R::from_document(doc).map_err(|e| match e {
            DecodeError::KindMismatch { .. } => StoreError::NotFound(format!("{} `{}`", R::KIND, id)),
            other => StoreError::Decode(other),
        })
    }

    pub async fn create<R: Record>(&self, record: &R) -> Result<(), StoreError> {
        let doc = record.to_document()?;
        self.store.insert(doc).await?;
        tracing::debug!(kind = %R::KIND, id = %record.id(), "Record created");
        Ok(())
    }

    /// Deletes `id` only if it is an `R`.
    pub async fn delete<R: Record>(&self, id: &str) -> Result<R, StoreError> {
        let record = self.get::<R>(id).await?;
        self.store.delete_by_id(id).await?;
        tracing::debug!(kind = %R::KIND, id = %id, "Record deleted");
        Ok(record)
    }

    pub async fn list<R: Record>(&self) -> Result<Vec<R>, StoreError> {
        self.find(&Filter::kind(R::KIND)).await
    }

    pub async fn find<R: Record>(&self, filter: &Filter) -> Result<Vec<R>, StoreError> {
        let docs = self.store.find(filter).await?;
        docs.into_iter()
            .map(|doc| R::from_document(doc).map_err(StoreError::from))
            .collect()
    }
}
