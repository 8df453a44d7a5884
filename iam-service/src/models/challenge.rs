use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::entity::{EntityKind, Record};

pub const CHALLENGE_PRINCIPAL_FIELD: &str = "principal";

/// One access question as asked by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
pub struct AccessRequest {
    #[validate(length(min = 1, message = "Principal is required"))]
    pub principal: String,
    #[validate(length(min = 1, message = "Resource is required"))]
    pub resource: String,
    #[validate(length(min = 1, message = "Action is required"))]
    pub action: String,
    #[serde(default)]
    pub issuer: String,
}

/// Append-only audit record of a single access decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: EntityKind,
    pub principal: String,
    pub resource: String,
    pub action: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub issuer: String,
    pub granted: bool,
}

impl Challenge {
    /// A not-yet-decided challenge: stamped with `time`, `granted = false`.
    pub fn provisional(id: String, request: AccessRequest, time: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: EntityKind::Challenge,
            principal: request.principal,
            resource: request.resource,
            action: request.action,
            time,
            issuer: request.issuer,
            granted: false,
        }
    }
}

impl Record for Challenge {
    const KIND: EntityKind = EntityKind::Challenge;

    fn id(&self) -> &str {
        &self.id
    }
}
