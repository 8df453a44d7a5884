//! Access decisions.
//!
//! An evaluation moves through `Initiated -> PrincipalResolved ->
//! ResourceResolved -> Decided -> Recorded`. Nothing is written before the
//! final audit insert, so any failure before `Recorded` is safe to retry.

use std::sync::Arc;
use thiserror::Error;

use super::clock::{Clock, IdGenerator};
use super::error::ErrorKind;
use super::matcher::PolicyMatcher;
use super::metrics::record_decision;
use super::repository::Repository;
use crate::models::{AccessRequest, Challenge, Resource, User};
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalState {
    Initiated,
    PrincipalResolved,
    ResourceResolved,
    Decided,
    Recorded,
}

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("principal `{0}` not found")]
    PrincipalNotFound(String),

    #[error("resource `{0}` not found")]
    ResourceNotFound(String),

    #[error("store failure after {state:?}: {source}")]
    Store {
        state: EvalState,
        #[source]
        source: StoreError,
    },

    /// The decision was computed but the audit record was not persisted.
    #[error("decision for challenge `{}` was not recorded: {source}", .challenge.id)]
    AuditWrite {
        challenge: Box<Challenge>,
        #[source]
        source: StoreError,
    },
}

impl EvalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::PrincipalNotFound(_) | EvalError::ResourceNotFound(_) => ErrorKind::NotFound,
            EvalError::Store { source, .. } | EvalError::AuditWrite { source, .. } => source.kind(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

#[derive(Clone)]
pub struct DecisionEngine {
    repo: Repository,
    matcher: PolicyMatcher,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl DecisionEngine {
    pub fn new(repo: Repository, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            matcher: PolicyMatcher::new(repo.clone()),
            repo,
            clock,
            ids,
        }
    }

    #[tracing::instrument(
        skip(self, request),
        fields(
            principal = %request.principal,
            resource = %request.resource,
            action = %request.action
        )
    )]
    pub async fn evaluate(&self, request: AccessRequest) -> Result<Challenge, EvalError> {
        let mut challenge = Challenge::provisional(self.ids.next_id(), request, self.clock.now());
        enter(EvalState::Initiated, &challenge);

        let principal: User = self.repo.get(&challenge.principal).await.map_err(|e| {
            if e.is_not_found() {
                EvalError::PrincipalNotFound(challenge.principal.clone())
            } else {
                EvalError::Store {
                    state: EvalState::Initiated,
                    source: e,
                }
            }
        })?;
        enter(EvalState::PrincipalResolved, &challenge);

        let resource: Resource = self.repo.get(&challenge.resource).await.map_err(|e| {
            if e.is_not_found() {
                EvalError::ResourceNotFound(challenge.resource.clone())
            } else {
                EvalError::Store {
                    state: EvalState::PrincipalResolved,
                    source: e,
                }
            }
        })?;
        enter(EvalState::ResourceResolved, &challenge);

        let via_ownership = resource.is_owned_by(&principal.id);
        if via_ownership {
            challenge.granted = true;
        } else {
            let matches = self
                .matcher
                .find_granting_policies(&resource.id, &challenge.action, &principal.identity_set())
                .await
                .map_err(|source| EvalError::Store {
                    state: EvalState::ResourceResolved,
                    source,
                })?;
            challenge.granted = !matches.is_empty();
            if let Some(first) = matches.first() {
                tracing::debug!(policy = %first.id, matches = matches.len(), "Granted by policy");
            }
        }
        enter(EvalState::Decided, &challenge);

        if let Err(source) = self.repo.create(&challenge).await {
            tracing::error!(
                target: "audit",
                challenge = %challenge.id,
                granted = challenge.granted,
                error = %source,
                "Access decision not recorded"
            );
            return Err(EvalError::AuditWrite {
                challenge: Box::new(challenge),
                source,
            });
        }
        enter(EvalState::Recorded, &challenge);

        let via = if via_ownership { "ownership" } else { "policy" };
        tracing::info!(
            target: "audit",
            challenge = %challenge.id,
            principal = %challenge.principal,
            resource = %challenge.resource,
            action = %challenge.action,
            issuer = %challenge.issuer,
            time = %challenge.time,
            granted = challenge.granted,
            via,
            "Access decision"
        );
        record_decision(challenge.granted, via_ownership);

        Ok(challenge)
    }
}

fn enter(state: EvalState, challenge: &Challenge) {
    tracing::debug!(?state, challenge = %challenge.id, "Evaluation state");
}
