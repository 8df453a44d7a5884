pub mod challenge;
pub mod entity;
pub mod group;
pub mod policy;
pub mod resource;
pub mod user;

pub use challenge::{AccessRequest, Challenge, CHALLENGE_PRINCIPAL_FIELD};
pub use entity::{DecodeError, Entity, EntityKind, Record, ID_FIELD, TYPE_FIELD};
pub use group::{Group, GroupDraft, MembershipChange, GROUP_MEMBERS_FIELD};
pub use policy::{
    Effect, Policy, PolicyDraft, POLICY_ACTION_FIELD, POLICY_EFFECT_FIELD, POLICY_PRINCIPAL_FIELD,
    POLICY_RESOURCE_FIELD, WILDCARD_ACTION,
};
pub use resource::{Resource, ResourceDraft, RESOURCE_OWNER_FIELD};
pub use user::{
    is_valid_email, User, UserDraft, UserResponse, USER_ACCESS_TOKEN_FIELD, USER_EMAIL_FIELD,
    USER_GROUPS_FIELD, USER_REFRESH_TOKEN_FIELD,
};
