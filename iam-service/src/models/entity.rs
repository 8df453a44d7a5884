//! Shared record plumbing: the kind discriminator, the `Record` capability
//! implemented by every persisted entity, and the heterogeneous `Entity` view.

use mongodb::bson::{self, Document};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use super::{Challenge, Group, Policy, Resource, User};

/// Document key holding the system-assigned identifier.
pub const ID_FIELD: &str = "@id";
/// Document key holding the kind discriminator.
pub const TYPE_FIELD: &str = "@type";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "Person")]
    User,
    #[serde(rename = "Organization")]
    Group,
    Resource,
    Policy,
    Challenge,
}

impl EntityKind {
    /// Tag persisted under `@type`.
    pub fn tag(&self) -> &'static str {
        match self {
            EntityKind::User => "Person",
            EntityKind::Group => "Organization",
            EntityKind::Resource => "Resource",
            EntityKind::Policy => "Policy",
            EntityKind::Challenge => "Challenge",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Person" => Some(EntityKind::User),
            "Organization" => Some(EntityKind::Group),
            "Resource" => Some(EntityKind::Resource),
            "Policy" => Some(EntityKind::Policy),
            "Challenge" => Some(EntityKind::Challenge),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::User => write!(f, "user"),
            EntityKind::Group => write!(f, "group"),
            EntityKind::Resource => write!(f, "resource"),
            EntityKind::Policy => write!(f, "policy"),
            EntityKind::Challenge => write!(f, "challenge"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("expected a {expected} document, found `{found}`")]
    KindMismatch { expected: EntityKind, found: String },

    #[error("failed to encode document: {0}")]
    Encode(#[from] bson::ser::Error),

    #[error("failed to decode document: {0}")]
    Decode(#[from] bson::de::Error),
}

/// Capability set shared by every persisted entity kind.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + Sized {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    fn to_document(&self) -> Result<Document, DecodeError> {
        Ok(bson::to_document(self)?)
    }

    fn from_document(doc: Document) -> Result<Self, DecodeError> {
        let found = doc.get_str(TYPE_FIELD).unwrap_or_default();
        if found != Self::KIND.tag() {
            return Err(DecodeError::KindMismatch {
                expected: Self::KIND,
                found: found.to_string(),
            });
        }
        Ok(bson::from_document(doc)?)
    }
}

/// Any stored entity, dispatched on its `@type` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    User(User),
    Group(Group),
    Resource(Resource),
    Policy(Policy),
    Challenge(Challenge),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::User(_) => EntityKind::User,
            Entity::Group(_) => EntityKind::Group,
            Entity::Resource(_) => EntityKind::Resource,
            Entity::Policy(_) => EntityKind::Policy,
            Entity::Challenge(_) => EntityKind::Challenge,
        }
    }

    pub fn from_document(doc: Document) -> Result<Self, DecodeError> {
        let tag = doc.get_str(TYPE_FIELD).unwrap_or_default().to_string();
        match EntityKind::from_tag(&tag) {
            Some(EntityKind::User) => Ok(Entity::User(User::from_document(doc)?)),
            Some(EntityKind::Group) => Ok(Entity::Group(Group::from_document(doc)?)),
            Some(EntityKind::Resource) => Ok(Entity::Resource(Resource::from_document(doc)?)),
            Some(EntityKind::Policy) => Ok(Entity::Policy(Policy::from_document(doc)?)),
            Some(EntityKind::Challenge) => Ok(Entity::Challenge(Challenge::from_document(doc)?)),
            None => Err(DecodeError::KindMismatch {
                expected: EntityKind::User,
                found: tag,
            }),
        }
    }
}
