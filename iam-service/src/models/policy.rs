use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use validator::Validate;

use super::entity::{EntityKind, Record};

/// Action sentinel that matches every requested action.
pub const WILDCARD_ACTION: &str = "*";

pub const POLICY_RESOURCE_FIELD: &str = "resource";
pub const POLICY_PRINCIPAL_FIELD: &str = "principal";
pub const POLICY_EFFECT_FIELD: &str = "effect";
pub const POLICY_ACTION_FIELD: &str = "action";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    #[default]
    Allow,
    /// Stored but never evaluated.
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "Allow",
            Effect::Deny => "Deny",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: EntityKind,
    pub resource: String,
    #[serde(default)]
    pub principal: BTreeSet<String>,
    #[serde(default)]
    pub effect: Effect,
    #[serde(default)]
    pub action: BTreeSet<String>,
    #[serde(default)]
    pub issuer: String,
}

impl Policy {
    pub fn from_draft(id: String, draft: PolicyDraft) -> Self {
        Self {
            id,
            kind: EntityKind::Policy,
            resource: draft.resource,
            principal: draft.principal.into_iter().collect(),
            effect: draft.effect.unwrap_or_default(),
            action: draft.action.into_iter().collect(),
            issuer: draft.issuer,
        }
    }

    pub fn covers_action(&self, action: &str) -> bool {
        self.action.contains(action) || self.action.contains(WILDCARD_ACTION)
    }

    /// True when this policy allows `action` on `resource` for any of `identities`.
    pub fn grants(&self, resource: &str, action: &str, identities: &BTreeSet<String>) -> bool {
        self.effect == Effect::Allow
            && self.resource == resource
            && self.covers_action(action)
            && self.principal.iter().any(|p| identities.contains(p))
    }
}

impl Record for Policy {
    const KIND: EntityKind = EntityKind::Policy;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PolicyDraft {
    #[validate(length(min = 1, message = "Policy resource is required"))]
    pub resource: String,
    #[serde(default)]
    pub principal: Vec<String>,
    #[serde(default)]
    pub effect: Option<Effect>,
    #[validate(length(min = 1, message = "Policy needs at least one action"))]
    #[serde(default)]
    pub action: Vec<String>,
    #[serde(default)]
    pub issuer: String,
}
