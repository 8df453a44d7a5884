//! Recorded compensations for multi-document sequences.

use std::fmt;

use crate::models::{EntityKind, ID_FIELD};
use crate::store::{EntityStore, SetOp};

/// Undo action for one applied step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    PullFromSet {
        kind: EntityKind,
        id: String,
        field: &'static str,
        value: String,
    },
    DeleteDocument {
        id: String,
    },
}

impl Compensation {
    pub fn pull(kind: EntityKind, id: &str, field: &'static str, value: &str) -> Self {
        Compensation::PullFromSet {
            kind,
            id: id.to_string(),
            field,
            value: value.to_string(),
        }
    }

    /// Already-absent targets count as undone.
    async fn apply(&self, store: &dyn EntityStore) -> bool {
        let result = match self {
            Compensation::PullFromSet {
                kind,
                id,
                field,
                value,
            } => store
                .update_set(*kind, id, field, SetOp::Pull, value)
                .await
                .map(|_| ()),
            Compensation::DeleteDocument { id } => store.delete_by_id(id).await.map(|_| ()),
        };
        match result {
            Ok(()) => true,
            Err(e) if e.is_not_found() => true,
            Err(e) => {
                tracing::warn!(step = %self, error = %e, "Compensation step failed");
                false
            }
        }
    }
}

impl fmt::Display for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compensation::PullFromSet {
                kind,
                id,
                field,
                value,
            } => write!(f, "pull `{}` from {} `{}`.{}", value, kind, id, field),
            Compensation::DeleteDocument { id } => write!(f, "delete {} `{}`", ID_FIELD, id),
        }
    }
}

/// Outcome of running a saga's compensations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompensationReport {
    pub undone: Vec<Compensation>,
    pub residue: Vec<Compensation>,
}

impl CompensationReport {
    pub fn is_complete(&self) -> bool {
        self.residue.is_empty()
    }
}

impl fmt::Display for CompensationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_complete() {
            return write!(f, "{} step(s) rolled back", self.undone.len());
        }
        write!(
            f,
            "{} step(s) rolled back, {} left applied: ",
            self.undone.len(),
            self.residue.len()
        )?;
        for (i, step) in self.residue.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Saga {
    name: &'static str,
    applied: Vec<Compensation>,
}

impl Saga {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            applied: Vec::new(),
        }
    }

    pub fn record(&mut self, compensation: Compensation) {
        self.applied.push(compensation);
    }

    /// Undoes applied steps newest first. Failed steps are kept as residue.
    pub async fn compensate(self, store: &dyn EntityStore) -> CompensationReport {
        let mut report = CompensationReport::default();
        for step in self.applied.into_iter().rev() {
            if step.apply(store).await {
                report.undone.push(step);
            } else {
                report.residue.push(step);
            }
        }
        if report.is_complete() {
            tracing::warn!(saga = self.name, undone = report.undone.len(), "Saga rolled back");
        } else {
            tracing::error!(saga = self.name, residue = %report, "Saga rollback incomplete");
            super::metrics::record_inconsistency(self.name);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{FailingStore, Op, Rule};
    use crate::store::MemoryStore;
    use mongodb::bson::doc;

    async fn seeded() -> FailingStore {
        let store = FailingStore::wrap(MemoryStore::new());
        for id in ["u1", "u2"] {
            store
                .insert(doc! { "@id": id, "@type": "Person", "email": format!("{}@x.org", id), "groups": ["g1"] })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn compensations_run_newest_first() {
        let store = seeded().await;
        let mut saga = Saga::new("test");
        saga.record(Compensation::pull(EntityKind::User, "u1", "groups", "g1"));
        saga.record(Compensation::pull(EntityKind::User, "u2", "groups", "g1"));

        let report = saga.compensate(&store).await;
        assert!(report.is_complete());
        assert_eq!(
            report.undone.first(),
            Some(&Compensation::pull(EntityKind::User, "u2", "groups", "g1"))
        );
        let u1 = store.find_by_id("u1").await.unwrap();
        assert!(u1.get_array("groups").unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_steps_become_residue() {
        let store = seeded().await;
        store.fail_when(Rule::on(Op::UpdateSet).target("u1"));

        let mut saga = Saga::new("test");
        saga.record(Compensation::pull(EntityKind::User, "u1", "groups", "g1"));
        saga.record(Compensation::pull(EntityKind::User, "u2", "groups", "g1"));

        let report = saga.compensate(&store).await;
        assert!(!report.is_complete());
        assert_eq!(report.residue.len(), 1);
        assert!(report.to_string().contains("u1"));
    }

    #[tokio::test]
    async fn missing_targets_count_as_undone() {
        let store = seeded().await;
        let mut saga = Saga::new("test");
        saga.record(Compensation::DeleteDocument { id: "gone".into() });

        assert!(saga.compensate(&store).await.is_complete());
    }
}
