use serde::{Deserialize, Serialize};
use validator::Validate;

use super::entity::{EntityKind, Record};

pub const RESOURCE_OWNER_FIELD: &str = "owner";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: EntityKind,
    pub owner: String,
}

impl Resource {
    pub fn new(id: String, owner: String) -> Self {
        Self {
            id,
            kind: EntityKind::Resource,
            owner,
        }
    }

    pub fn is_owned_by(&self, principal: &str) -> bool {
        self.owner == principal
    }
}

impl Record for Resource {
    const KIND: EntityKind = EntityKind::Resource;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ResourceDraft {
    #[validate(length(min = 1, message = "Resource owner is required"))]
    pub owner: String,
}
