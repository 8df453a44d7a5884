//! Identity graph maintenance.
//!
//! Group membership is stored on both sides (`Group.members` and
//! `User.groups`) and groups/users are referenced from `Policy.principal`.
//! The store only offers single-document atomicity, so every operation
//! touching several documents runs as a saga:
//!
//! * `create_group` and `add_members` abort on the first failed step and
//!   synchronously undo what they already applied.
//! * `delete_group`, `delete_resource`, `delete_user` and `remove_members`
//!   are forward-only; each step is idempotent, so a failure names the step
//!   and the whole operation can be retried.

use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

use super::clock::IdGenerator;
use super::error::ErrorKind;
use super::repository::Repository;
use super::saga::{Compensation, CompensationReport, Saga};
use crate::models::{
    EntityKind, Group, GroupDraft, Record, Resource, User, GROUP_MEMBERS_FIELD,
    POLICY_PRINCIPAL_FIELD, POLICY_RESOURCE_FIELD, USER_GROUPS_FIELD,
};
use crate::store::{Filter, SetOp, StoreError};

const GROUP_ADMIN_FIELD: &str = "admin";

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("{kind} `{id}` not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("admin user `{0}` not found")]
    AdminNotFound(String),

    #[error("member user `{member}` not found ({compensation})")]
    MemberNotFound {
        member: String,
        compensation: CompensationReport,
    },

    #[error("failed to update membership of user `{user}` in group `{group}`: {source}")]
    MemberUpdateFailed {
        group: String,
        user: String,
        #[source]
        source: StoreError,
        compensation: Option<CompensationReport>,
    },

    #[error("failed to unlink users still referencing group `{group}`: {source}")]
    StaleMembershipCleanupFailed {
        group: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to remove user `{user}` from group member lists: {source}")]
    GroupMembershipCleanupFailed {
        user: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to remove principal `{principal}` from policies: {source}")]
    PolicyUpdateFailed {
        principal: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to insert group `{group}` ({compensation}): {source}")]
    GroupInsertFailed {
        group: String,
        #[source]
        source: StoreError,
        compensation: CompensationReport,
    },

    #[error("failed to delete group `{group}`: {source}")]
    GroupDeleteFailed {
        group: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to delete policies of resource `{resource}`: {source}")]
    PolicyDeleteFailed {
        resource: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to delete resource `{resource}`: {source}")]
    ResourceDeleteFailed {
        resource: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to delete user `{user}`: {source}")]
    UserDeleteFailed {
        user: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GraphError {
    /// A fully rolled back failure keeps the kind of its cause; anything that
    /// may have left references behind is a graph inconsistency.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::MissingField(_) | GraphError::Validation(_) => ErrorKind::Validation,
            GraphError::NotFound { .. } | GraphError::AdminNotFound(_) => ErrorKind::NotFound,
            GraphError::MemberNotFound { compensation, .. } => {
                if compensation.is_complete() {
                    ErrorKind::NotFound
                } else {
                    ErrorKind::GraphInconsistency
                }
            }
            GraphError::MemberUpdateFailed {
                source,
                compensation: Some(report),
                ..
            }
            | GraphError::GroupInsertFailed {
                source,
                compensation: report,
                ..
            } if report.is_complete() => source.kind(),
            GraphError::MemberUpdateFailed { .. }
            | GraphError::GroupInsertFailed { .. }
            | GraphError::StaleMembershipCleanupFailed { .. }
            | GraphError::GroupMembershipCleanupFailed { .. }
            | GraphError::PolicyUpdateFailed { .. }
            | GraphError::GroupDeleteFailed { .. }
            | GraphError::PolicyDeleteFailed { .. }
            | GraphError::ResourceDeleteFailed { .. }
            | GraphError::UserDeleteFailed { .. } => ErrorKind::GraphInconsistency,
            GraphError::Store(e) => e.kind(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    fn lookup(kind: EntityKind, id: &str, err: StoreError) -> Self {
        if err.is_not_found() {
            GraphError::NotFound {
                kind,
                id: id.to_string(),
            }
        } else {
            GraphError::Store(err)
        }
    }
}

#[derive(Clone)]
pub struct IdentityGraph {
    repo: Repository,
    ids: Arc<dyn IdGenerator>,
}

impl IdentityGraph {
    pub fn new(repo: Repository, ids: Arc<dyn IdGenerator>) -> Self {
        Self { repo, ids }
    }

    /// Creates a group and links the admin and every member to it.
    #[tracing::instrument(skip(self, draft), fields(group.name = %draft.name, group.admin = %draft.admin))]
    pub async fn create_group(&self, draft: GroupDraft) -> Result<Group, GraphError> {
        if draft.name.trim().is_empty() {
            return Err(GraphError::MissingField("name"));
        }
        if draft.admin.trim().is_empty() {
            return Err(GraphError::MissingField("admin"));
        }

        let group = Group::from_draft(self.ids.next_id(), draft);
        let document = group.to_document().map_err(StoreError::from)?;
        let store = self.repo.store();
        let mut saga = Saga::new("create_group");

        match store
            .update_set(
                EntityKind::User,
                &group.admin,
                USER_GROUPS_FIELD,
                SetOp::AddToSet,
                &group.id,
            )
            .await
        {
            Ok(_) => saga.record(unlink_user(&group.admin, &group.id)),
            Err(e) if e.is_not_found() => {
                return Err(GraphError::AdminNotFound(group.admin.clone()));
            }
            Err(source) => {
                if matches!(source, StoreError::Timeout { .. }) {
                    saga.record(unlink_user(&group.admin, &group.id));
                }
                let report = saga.compensate(store).await;
                return Err(GraphError::MemberUpdateFailed {
                    group: group.id.clone(),
                    user: group.admin.clone(),
                    source,
                    compensation: Some(report),
                });
            }
        }

        for member in group.non_admin_members() {
            match store
                .update_set(
                    EntityKind::User,
                    member,
                    USER_GROUPS_FIELD,
                    SetOp::AddToSet,
                    &group.id,
                )
                .await
            {
                Ok(_) => saga.record(unlink_user(member, &group.id)),
                Err(e) if e.is_not_found() => {
                    tracing::warn!(group = %group.id, member = %member, "Group member does not exist");
                    let report = saga.compensate(store).await;
                    return Err(GraphError::MemberNotFound {
                        member: member.clone(),
                        compensation: report,
                    });
                }
                Err(source) => {
                    if matches!(source, StoreError::Timeout { .. }) {
                        saga.record(unlink_user(member, &group.id));
                    }
                    let report = saga.compensate(store).await;
                    return Err(GraphError::MemberUpdateFailed {
                        group: group.id.clone(),
                        user: member.clone(),
                        source,
                        compensation: Some(report),
                    });
                }
            }
        }

        if let Err(source) = store.insert(document).await {
            // A duplicate id belongs to someone else's document; leave it be.
            if matches!(source, StoreError::Timeout { .. }) {
                saga.record(Compensation::DeleteDocument {
                    id: group.id.clone(),
                });
            }
            let report = saga.compensate(store).await;
            return Err(GraphError::GroupInsertFailed {
                group: group.id.clone(),
                source,
                compensation: report,
            });
        }

        tracing::info!(group = %group.id, members = group.members.len(), "Group created");
        Ok(group)
    }

    /// Unlinks the group from its members and from every policy, then deletes it.
    #[tracing::instrument(skip(self))]
    pub async fn delete_group(&self, id: &str) -> Result<Group, GraphError> {
        let group: Group = self
            .repo
            .get(id)
            .await
            .map_err(|e| GraphError::lookup(EntityKind::Group, id, e))?;
        let store = self.repo.store();

        let mut linked: BTreeSet<&String> = group.members.iter().collect();
        linked.insert(&group.admin);
        for user in linked {
            match store
                .update_set(EntityKind::User, user, USER_GROUPS_FIELD, SetOp::Pull, id)
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    tracing::warn!(group = %id, user = %user, "Group member already gone");
                }
                Err(source) => {
                    return Err(GraphError::MemberUpdateFailed {
                        group: id.to_string(),
                        user: user.clone(),
                        source,
                        compensation: None,
                    });
                }
            }
        }

        // Users that still reference the group without being listed as members.
        let stale = Filter::kind(EntityKind::User).eq(USER_GROUPS_FIELD, id);
        match store
            .update_set_many(&stale, USER_GROUPS_FIELD, SetOp::Pull, id)
            .await
        {
            Ok(0) => {}
            Ok(n) => tracing::warn!(group = %id, users = n, "Unlinked stale group references"),
            Err(source) => {
                return Err(GraphError::StaleMembershipCleanupFailed {
                    group: id.to_string(),
                    source,
                });
            }
        }

        self.unlink_principal(id).await?;

        match store.delete_by_id(id).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                tracing::warn!(group = %id, "Group document already deleted");
            }
            Err(source) => {
                return Err(GraphError::GroupDeleteFailed {
                    group: id.to_string(),
                    source,
                });
            }
        }

        tracing::info!(group = %id, "Group deleted");
        Ok(group)
    }

    /// Deletes every policy on the resource, then the resource itself.
    #[tracing::instrument(skip(self))]
    pub async fn delete_resource(&self, id: &str) -> Result<Resource, GraphError> {
        let resource: Resource = self
            .repo
            .get(id)
            .await
            .map_err(|e| GraphError::lookup(EntityKind::Resource, id, e))?;
        let store = self.repo.store();

        let policies = Filter::kind(EntityKind::Policy).eq(POLICY_RESOURCE_FIELD, id);
        let removed = store
            .delete_many(&policies)
            .await
            .map_err(|source| GraphError::PolicyDeleteFailed {
                resource: id.to_string(),
                source,
            })?;

        match store.delete_by_id(id).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                tracing::warn!(resource = %id, "Resource document already deleted");
            }
            Err(source) => {
                return Err(GraphError::ResourceDeleteFailed {
                    resource: id.to_string(),
                    source,
                });
            }
        }

        tracing::info!(resource = %id, policies = removed, "Resource deleted");
        Ok(resource)
    }

    /// Removes the user from every group and policy before deleting it.
    /// A user that administers a group cannot be deleted.
    #[tracing::instrument(skip(self))]
    pub async fn delete_user(&self, id: &str) -> Result<User, GraphError> {
        let user: User = self
            .repo
            .get(id)
            .await
            .map_err(|e| GraphError::lookup(EntityKind::User, id, e))?;
        let store = self.repo.store();

        let administered: Vec<Group> = self
            .repo
            .find(&Filter::kind(EntityKind::Group).eq(GROUP_ADMIN_FIELD, id))
            .await?;
        if !administered.is_empty() {
            let names: Vec<&str> = administered.iter().map(|g| g.id.as_str()).collect();
            return Err(GraphError::Validation(format!(
                "user `{}` administers group(s) {}; delete or reassign them first",
                id,
                names.join(", ")
            )));
        }

        let groups = Filter::kind(EntityKind::Group).eq(GROUP_MEMBERS_FIELD, id);
        store
            .update_set_many(&groups, GROUP_MEMBERS_FIELD, SetOp::Pull, id)
            .await
            .map_err(|source| GraphError::GroupMembershipCleanupFailed {
                user: id.to_string(),
                source,
            })?;

        self.unlink_principal(id).await?;

        match store.delete_by_id(id).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                tracing::warn!(user = %id, "User document already deleted");
            }
            Err(source) => {
                return Err(GraphError::UserDeleteFailed {
                    user: id.to_string(),
                    source,
                });
            }
        }

        tracing::info!(user = %id, "User deleted");
        Ok(user)
    }

    /// Adds users to a group, linking both sides. Rolls back on failure.
    #[tracing::instrument(skip(self, users))]
    pub async fn add_members(&self, group_id: &str, users: &[String]) -> Result<Group, GraphError> {
        let group: Group = self
            .repo
            .get(group_id)
            .await
            .map_err(|e| GraphError::lookup(EntityKind::Group, group_id, e))?;
        let store = self.repo.store();

        let new_members: BTreeSet<&String> = users
            .iter()
            .filter(|u| !u.is_empty() && !group.members.contains(*u))
            .collect();
        let mut saga = Saga::new("add_members");

        for user in new_members {
            match store
                .update_set(
                    EntityKind::User,
                    user,
                    USER_GROUPS_FIELD,
                    SetOp::AddToSet,
                    group_id,
                )
                .await
            {
                Ok(_) => saga.record(unlink_user(user, group_id)),
                Err(e) if e.is_not_found() => {
                    let report = saga.compensate(store).await;
                    return Err(GraphError::MemberNotFound {
                        member: user.clone(),
                        compensation: report,
                    });
                }
                Err(source) => {
                    if matches!(source, StoreError::Timeout { .. }) {
                        saga.record(unlink_user(user, group_id));
                    }
                    let report = saga.compensate(store).await;
                    return Err(GraphError::MemberUpdateFailed {
                        group: group_id.to_string(),
                        user: user.clone(),
                        source,
                        compensation: Some(report),
                    });
                }
            }

            match store
                .update_set(
                    EntityKind::Group,
                    group_id,
                    GROUP_MEMBERS_FIELD,
                    SetOp::AddToSet,
                    user,
                )
                .await
            {
                Ok(_) => saga.record(Compensation::pull(
                    EntityKind::Group,
                    group_id,
                    GROUP_MEMBERS_FIELD,
                    user,
                )),
                Err(source) => {
                    if matches!(source, StoreError::Timeout { .. }) {
                        saga.record(Compensation::pull(
                            EntityKind::Group,
                            group_id,
                            GROUP_MEMBERS_FIELD,
                            user,
                        ));
                    }
                    let report = saga.compensate(store).await;
                    if source.is_not_found() && report.is_complete() {
                        tracing::warn!(group = %group_id, %report, "Group vanished while adding members");
                        return Err(GraphError::NotFound {
                            kind: EntityKind::Group,
                            id: group_id.to_string(),
                        });
                    }
                    return Err(GraphError::MemberUpdateFailed {
                        group: group_id.to_string(),
                        user: user.clone(),
                        source,
                        compensation: Some(report),
                    });
                }
            }
        }

        self.repo
            .get(group_id)
            .await
            .map_err(|e| GraphError::lookup(EntityKind::Group, group_id, e))
    }

    /// Removes users from a group on both sides. The admin cannot be removed.
    #[tracing::instrument(skip(self, users))]
    pub async fn remove_members(
        &self,
        group_id: &str,
        users: &[String],
    ) -> Result<Group, GraphError> {
        let group: Group = self
            .repo
            .get(group_id)
            .await
            .map_err(|e| GraphError::lookup(EntityKind::Group, group_id, e))?;
        if users.iter().any(|u| *u == group.admin) {
            return Err(GraphError::Validation(format!(
                "`{}` is the admin of group `{}` and cannot be removed",
                group.admin, group_id
            )));
        }
        let store = self.repo.store();

        for user in users {
            match store
                .update_set(EntityKind::User, user, USER_GROUPS_FIELD, SetOp::Pull, group_id)
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(source) => {
                    return Err(GraphError::MemberUpdateFailed {
                        group: group_id.to_string(),
                        user: user.clone(),
                        source,
                        compensation: None,
                    });
                }
            }

            store
                .update_set(
                    EntityKind::Group,
                    group_id,
                    GROUP_MEMBERS_FIELD,
                    SetOp::Pull,
                    user,
                )
                .await
                .map_err(|source| {
                    if source.is_not_found() {
                        GraphError::NotFound {
                            kind: EntityKind::Group,
                            id: group_id.to_string(),
                        }
                    } else {
                        GraphError::MemberUpdateFailed {
                            group: group_id.to_string(),
                            user: user.clone(),
                            source,
                            compensation: None,
                        }
                    }
                })?;
        }

        self.repo
            .get(group_id)
            .await
            .map_err(|e| GraphError::lookup(EntityKind::Group, group_id, e))
    }

    /// Policies that lose their last principal are kept; they simply stop matching.
    async fn unlink_principal(&self, principal: &str) -> Result<(), GraphError> {
        let referencing = Filter::kind(EntityKind::Policy).eq(POLICY_PRINCIPAL_FIELD, principal);
        let changed = self
            .repo
            .store()
            .update_set_many(&referencing, POLICY_PRINCIPAL_FIELD, SetOp::Pull, principal)
            .await
            .map_err(|source| GraphError::PolicyUpdateFailed {
                principal: principal.to_string(),
                source,
            })?;
        if changed > 0 {
            tracing::debug!(principal = %principal, policies = changed, "Principal removed from policies");
        }
        Ok(())
    }
}

fn unlink_user(user: &str, group: &str) -> Compensation {
    Compensation::pull(EntityKind::User, user, USER_GROUPS_FIELD, group)
}
