//! In-process store with the same single-document semantics as `MongoStore`.
//! Backs the `memory` backend and the test suites.

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{EntityStore, Filter, SetOp, StoreError};
use crate::models::{EntityKind, ID_FIELD, TYPE_FIELD, USER_EMAIL_FIELD};

#[derive(Default)]
struct InnerState {
    documents: BTreeMap<String, Document>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<InnerState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|s| s.documents.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, InnerState>, StoreError> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("memory store mutex poisoned: {}", e)))
    }
}

fn is_kind(doc: &Document, kind: EntityKind) -> bool {
    doc.get_str(TYPE_FIELD).ok() == Some(kind.tag())
}

fn apply_set_op(doc: &mut Document, field: &str, op: SetOp, value: &str) -> Result<bool, StoreError> {
    if !doc.contains_key(field) {
        if op == SetOp::Pull {
            return Ok(false);
        }
        doc.insert(field, Bson::Array(Vec::new()));
    }
    let items = match doc.get_mut(field) {
        Some(Bson::Array(items)) => items,
        _ => {
            return Err(StoreError::Unavailable(format!(
                "field `{}` is not an array",
                field
            )))
        }
    };

    let present = items.iter().any(|b| b.as_str() == Some(value));
    match op {
        SetOp::AddToSet if !present => {
            items.push(Bson::String(value.to_string()));
            Ok(true)
        }
        SetOp::Pull if present => {
            items.retain(|b| b.as_str() != Some(value));
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn insert(&self, doc: Document) -> Result<(), StoreError> {
        let id = doc
            .get_str(ID_FIELD)
            .map_err(|_| StoreError::Unavailable("document has no `@id`".to_string()))?
            .to_string();

        let mut state = self.lock()?;
        if state.documents.contains_key(&id) {
            return Err(StoreError::Duplicate(format!("{} `{}`", ID_FIELD, id)));
        }
        if is_kind(&doc, EntityKind::User) {
            if let Ok(email) = doc.get_str(USER_EMAIL_FIELD) {
                let taken = state.documents.values().any(|other| {
                    is_kind(other, EntityKind::User)
                        && other.get_str(USER_EMAIL_FIELD).ok() == Some(email)
                });
                if taken {
                    return Err(StoreError::Duplicate(format!("email `{}`", email)));
                }
            }
        }
        state.documents.insert(id, doc);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Document, StoreError> {
        self.lock()?
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .lock()?
            .documents
            .values()
            .filter(|doc| filter.matches(doc))
            .cloned()
            .collect())
    }

    async fn update_set(
        &self,
        kind: EntityKind,
        id: &str,
        field: &str,
        op: SetOp,
        value: &str,
    ) -> Result<Document, StoreError> {
        let mut state = self.lock()?;
        let doc = state
            .documents
            .get_mut(id)
            .filter(|doc| is_kind(doc, kind))
            .ok_or_else(|| StoreError::NotFound(format!("{} `{}`", kind, id)))?;
        apply_set_op(doc, field, op, value)?;
        Ok(doc.clone())
    }

    async fn update_set_many(
        &self,
        filter: &Filter,
        field: &str,
        op: SetOp,
        value: &str,
    ) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        let mut changed = 0;
        for doc in state.documents.values_mut().filter(|doc| filter.matches(doc)) {
            if apply_set_op(doc, field, op, value)? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn set_field(
        &self,
        kind: EntityKind,
        id: &str,
        field: &str,
        value: Option<&str>,
    ) -> Result<Document, StoreError> {
        let mut state = self.lock()?;
        let doc = state
            .documents
            .get_mut(id)
            .filter(|doc| is_kind(doc, kind))
            .ok_or_else(|| StoreError::NotFound(format!("{} `{}`", kind, id)))?;
        match value {
            Some(v) => {
                doc.insert(field, v);
            }
            None => {
                doc.remove(field);
            }
        }
        Ok(doc.clone())
    }

    async fn delete_by_id(&self, id: &str) -> Result<Document, StoreError> {
        self.lock()?
            .documents
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        let before = state.documents.len();
        state.documents.retain(|_, doc| !filter.matches(doc));
        Ok((before - state.documents.len()) as u64)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}
