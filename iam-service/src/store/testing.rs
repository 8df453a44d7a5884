//! Failure-injecting store used by the saga and evaluator tests.

use async_trait::async_trait;
use mongodb::bson::Document;
use std::sync::Mutex;
use std::time::Duration;

use super::{EntityStore, Filter, MemoryStore, SetOp, StoreError};
use crate::models::{EntityKind, ID_FIELD, TYPE_FIELD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Insert,
    FindById,
    Find,
    UpdateSet,
    UpdateSetMany,
    DeleteById,
    DeleteMany,
}

/// What an injected failure looks like to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Unavailable,
    /// The write lands, then the call reports a timeout.
    TimeoutAfterWrite,
    /// The target looks absent, as if deleted concurrently.
    Missing,
}

impl Failure {
    fn error(self) -> StoreError {
        match self {
            Failure::Unavailable => StoreError::Unavailable("injected failure".to_string()),
            Failure::TimeoutAfterWrite => StoreError::Timeout {
                operation: "injected",
                after: Duration::from_millis(1),
            },
            Failure::Missing => StoreError::NotFound("injected".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    op: Op,
    target: Option<String>,
    set_op: Option<SetOp>,
    failure: Failure,
}

impl Rule {
    pub fn on(op: Op) -> Self {
        Self {
            op,
            target: None,
            set_op: None,
            failure: Failure::Unavailable,
        }
    }

    /// Only when the document id (or, for inserts, the `@type` tag) equals `target`.
    pub fn target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn set_op(mut self, op: SetOp) -> Self {
        self.set_op = Some(op);
        self
    }

    /// Let the write land, then report a timeout.
    pub fn timing_out_after_write(mut self) -> Self {
        self.failure = Failure::TimeoutAfterWrite;
        self
    }

    /// Report the target as missing without touching it.
    pub fn reporting_missing(mut self) -> Self {
        self.failure = Failure::Missing;
        self
    }

    fn applies(&self, op: Op, target: Option<&str>, set_op: Option<SetOp>) -> bool {
        self.op == op
            && self.target.as_deref().is_none_or(|t| Some(t) == target)
            && self.set_op.is_none_or(|s| Some(s) == set_op)
    }
}

#[derive(Default)]
pub struct FailingStore {
    pub inner: MemoryStore,
    rules: Mutex<Vec<Rule>>,
}

impl FailingStore {
    pub fn wrap(inner: MemoryStore) -> Self {
        Self {
            inner,
            rules: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_when(&self, rule: Rule) {
        self.rules.lock().unwrap().push(rule);
    }

    pub fn heal(&self) {
        self.rules.lock().unwrap().clear();
    }

    fn check(&self, op: Op, target: Option<&str>, set_op: Option<SetOp>) -> Option<Failure> {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.applies(op, target, set_op))
            .map(|r| r.failure)
    }
}

#[async_trait]
impl EntityStore for FailingStore {
    async fn insert(&self, doc: Document) -> Result<(), StoreError> {
        let tag = doc.get_str(TYPE_FIELD).ok().map(str::to_string);
        let id = doc.get_str(ID_FIELD).ok().map(str::to_string);
        let hit = self
            .check(Op::Insert, tag.as_deref(), None)
            .or_else(|| self.check(Op::Insert, id.as_deref(), None));
        match hit {
            Some(Failure::TimeoutAfterWrite) => {
                self.inner.insert(doc).await?;
                Err(Failure::TimeoutAfterWrite.error())
            }
            Some(failure) => Err(failure.error()),
            None => self.inner.insert(doc).await,
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Document, StoreError> {
        if let Some(failure) = self.check(Op::FindById, Some(id), None) {
            return Err(failure.error());
        }
        self.inner.find_by_id(id).await
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let tag = filter.entity_kind().map(|k| k.tag());
        if let Some(failure) = self.check(Op::Find, tag, None) {
            return Err(failure.error());
        }
        self.inner.find(filter).await
    }

    async fn update_set(
        &self,
        kind: EntityKind,
        id: &str,
        field: &str,
        op: SetOp,
        value: &str,
    ) -> Result<Document, StoreError> {
        match self.check(Op::UpdateSet, Some(id), Some(op)) {
            Some(Failure::TimeoutAfterWrite) => {
                self.inner.update_set(kind, id, field, op, value).await?;
                Err(Failure::TimeoutAfterWrite.error())
            }
            Some(failure) => Err(failure.error()),
            None => self.inner.update_set(kind, id, field, op, value).await,
        }
    }

    async fn update_set_many(
        &self,
        filter: &Filter,
        field: &str,
        op: SetOp,
        value: &str,
    ) -> Result<u64, StoreError> {
        let tag = filter.entity_kind().map(|k| k.tag());
        if let Some(failure) = self.check(Op::UpdateSetMany, tag, Some(op)) {
            return Err(failure.error());
        }
        self.inner.update_set_many(filter, field, op, value).await
    }

    async fn set_field(
        &self,
        kind: EntityKind,
        id: &str,
        field: &str,
        value: Option<&str>,
    ) -> Result<Document, StoreError> {
        self.inner.set_field(kind, id, field, value).await
    }

    async fn delete_by_id(&self, id: &str) -> Result<Document, StoreError> {
        if let Some(failure) = self.check(Op::DeleteById, Some(id), None) {
            return Err(failure.error());
        }
        self.inner.delete_by_id(id).await
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64, StoreError> {
        let tag = filter.entity_kind().map(|k| k.tag());
        if let Some(failure) = self.check(Op::DeleteMany, tag, None) {
            return Err(failure.error());
        }
        self.inner.delete_many(filter).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}
