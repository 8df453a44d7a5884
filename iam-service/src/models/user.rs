//! User model - principals that authenticate and belong to groups.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use validator::Validate;

use super::entity::{EntityKind, Record};

/// Field names used in store queries and set mutations.
pub const USER_GROUPS_FIELD: &str = "groups";
pub const USER_EMAIL_FIELD: &str = "email";
pub const USER_ACCESS_TOKEN_FIELD: &str = "access_token";
pub const USER_REFRESH_TOKEN_FIELD: &str = "refresh_token";

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9\-_.]*@[a-zA-Z]*\.[a-zA-Z]*$").expect("email pattern is valid")
});

/// Checks an address against the simple `local@domain.tld` shape accepted for users.
pub fn is_valid_email(email: &str) -> bool {
    !email.is_empty() && EMAIL_PATTERN.is_match(email)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: EntityKind,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl User {
    pub fn new(id: String, name: String, email: String, role: String) -> Self {
        Self {
            id,
            kind: EntityKind::User,
            name,
            email,
            role,
            groups: BTreeSet::new(),
            access_token: None,
            refresh_token: None,
        }
    }

    /// The user's own id plus every group it belongs to.
    pub fn identity_set(&self) -> BTreeSet<String> {
        let mut identities = self.groups.clone();
        identities.insert(self.id.clone());
        identities
    }

    /// Strip session state before handing the user to a client.
    pub fn sanitized(&self) -> UserResponse {
        UserResponse::from(self.clone())
    }
}

impl Record for User {
    const KIND: EntityKind = EntityKind::User;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Client-supplied fields for a new user.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UserDraft {
    #[validate(length(min = 1, message = "User name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "User email is required"))]
    pub email: String,
    #[serde(default)]
    pub role: String,
}

/// User as returned to API clients (no session tokens).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: EntityKind,
    pub name: String,
    pub email: String,
    pub role: String,
    pub groups: BTreeSet<String>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            kind: u.kind,
            name: u.name,
            email: u.email,
            role: u.role,
            groups: u.groups,
        }
    }
}
