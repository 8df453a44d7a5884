use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use validator::Validate;

use super::entity::{EntityKind, Record};

pub const GROUP_MEMBERS_FIELD: &str = "members";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: EntityKind,
    pub name: String,
    pub admin: String,
    #[serde(default)]
    pub members: BTreeSet<String>,
}

impl Group {
    /// Builds a group from a draft; the admin always ends up in `members`.
    pub fn from_draft(id: String, draft: GroupDraft) -> Self {
        let mut members: BTreeSet<String> = draft
            .members
            .into_iter()
            .filter(|m| !m.is_empty())
            .collect();
        members.insert(draft.admin.clone());

        Self {
            id,
            kind: EntityKind::Group,
            name: draft.name,
            admin: draft.admin,
            members,
        }
    }

    /// Members other than the admin, in a stable order.
    pub fn non_admin_members(&self) -> impl Iterator<Item = &String> {
        self.members.iter().filter(move |m| **m != self.admin)
    }
}

impl Record for Group {
    const KIND: EntityKind = EntityKind::Group;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GroupDraft {
    #[validate(length(min = 1, message = "Group name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "Group admin is required"))]
    pub admin: String,
    #[serde(default)]
    pub members: Vec<String>,
}

/// Body of the member add/remove endpoints.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MembershipChange {
    #[validate(length(min = 1, message = "At least one member is required"))]
    pub members: Vec<String>,
}
