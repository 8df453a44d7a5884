use std::collections::BTreeSet;
use std::sync::Arc;
use validator::Validate;

use super::clock::{Clock, IdGenerator};
use super::error::ServiceError;
use super::evaluator::DecisionEngine;
use super::graph::IdentityGraph;
use super::repository::Repository;
use crate::models::{
    is_valid_email, AccessRequest, Challenge, Effect, Entity, EntityKind, Group, GroupDraft,
    Policy, PolicyDraft, Record, Resource, ResourceDraft, User, UserDraft,
    CHALLENGE_PRINCIPAL_FIELD, ID_FIELD, POLICY_PRINCIPAL_FIELD, RESOURCE_OWNER_FIELD,
    USER_EMAIL_FIELD,
};
use crate::store::{EntityStore, Filter, StoreError};

/// Entry point for every identity and access operation.
#[derive(Clone)]
pub struct IamService {
    repo: Repository,
    graph: IdentityGraph,
    engine: DecisionEngine,
    ids: Arc<dyn IdGenerator>,
}

fn lookup(kind: EntityKind, id: &str) -> impl FnOnce(StoreError) -> ServiceError + '_ {
    move |e| {
        if e.is_not_found() {
            ServiceError::not_found(kind, id)
        } else {
            ServiceError::Store(e)
        }
    }
}

impl IamService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let repo = Repository::new(store);
        Self {
            graph: IdentityGraph::new(repo.clone(), ids.clone()),
            engine: DecisionEngine::new(repo.clone(), clock, ids.clone()),
            repo,
            ids,
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    // Users

    #[tracing::instrument(skip(self, draft), fields(email = %draft.email))]
    pub async fn create_user(&self, draft: UserDraft) -> Result<User, ServiceError> {
        draft.validate()?;
        if !is_valid_email(&draft.email) {
            return Err(ServiceError::Validation(format!(
                "`{}` is not a valid email address",
                draft.email
            )));
        }

        let user = User::new(self.ids.next_id(), draft.name, draft.email, draft.role);
        self.repo.create(&user).await.map_err(|e| match e {
            StoreError::Duplicate(_) => {
                ServiceError::Conflict(format!("email `{}` is already registered", user.email))
            }
            other => ServiceError::Store(other),
        })?;

        tracing::info!(user = %user.id, "User created");
        Ok(user)
    }

    pub async fn get_user(&self, id: &str) -> Result<User, ServiceError> {
        self.repo
            .get(id)
            .await
            .map_err(lookup(EntityKind::User, id))
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<User, ServiceError> {
        let filter = Filter::kind(EntityKind::User).eq(USER_EMAIL_FIELD, email);
        self.repo
            .find::<User>(&filter)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::not_found(EntityKind::User, email))
    }

    pub async fn delete_user(&self, id: &str) -> Result<User, ServiceError> {
        Ok(self.graph.delete_user(id).await?)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, ServiceError> {
        Ok(self.repo.list().await?)
    }

    /// Resources whose owner is `id`.
    pub async fn list_owned_resources(&self, id: &str) -> Result<Vec<Resource>, ServiceError> {
        self.get_user(id).await?;
        let filter = Filter::kind(EntityKind::Resource).eq(RESOURCE_OWNER_FIELD, id);
        Ok(self.repo.find(&filter).await?)
    }

    /// Policies naming the user or one of their groups as a principal.
    pub async fn list_user_policies(&self, id: &str) -> Result<Vec<Policy>, ServiceError> {
        let user = self.get_user(id).await?;
        let filter =
            Filter::kind(EntityKind::Policy).any_of(POLICY_PRINCIPAL_FIELD, user.identity_set());
        Ok(self.repo.find(&filter).await?)
    }

    /// Decisions recorded for `id`. The audit trail outlives the user, so a
    /// deleted user still has a history.
    pub async fn list_user_challenges(&self, id: &str) -> Result<Vec<Challenge>, ServiceError> {
        let filter = Filter::kind(EntityKind::Challenge).eq(CHALLENGE_PRINCIPAL_FIELD, id);
        Ok(self.repo.find(&filter).await?)
    }

    /// Resources the user owns or is granted by an Allow policy, each listed once.
    pub async fn list_user_access(&self, id: &str) -> Result<Vec<Resource>, ServiceError> {
        let mut resources = self.list_owned_resources(id).await?;
        let mut seen: BTreeSet<String> = resources.iter().map(|r| r.id.clone()).collect();

        let granted: BTreeSet<String> = self
            .list_user_policies(id)
            .await?
            .into_iter()
            .filter(|p| p.effect == Effect::Allow)
            .map(|p| p.resource)
            .filter(|r| !seen.contains(r))
            .collect();
        if granted.is_empty() {
            return Ok(resources);
        }

        let filter = Filter::kind(EntityKind::Resource).any_of(ID_FIELD, granted);
        for resource in self.repo.find::<Resource>(&filter).await? {
            if seen.insert(resource.id.clone()) {
                resources.push(resource);
            }
        }
        Ok(resources)
    }

    // Groups

    pub async fn create_group(&self, draft: GroupDraft) -> Result<Group, ServiceError> {
        Ok(self.graph.create_group(draft).await?)
    }

    pub async fn get_group(&self, id: &str) -> Result<Group, ServiceError> {
        self.repo
            .get(id)
            .await
            .map_err(lookup(EntityKind::Group, id))
    }

    pub async fn delete_group(&self, id: &str) -> Result<Group, ServiceError> {
        Ok(self.graph.delete_group(id).await?)
    }

    pub async fn list_groups(&self) -> Result<Vec<Group>, ServiceError> {
        Ok(self.repo.list().await?)
    }

    pub async fn add_group_members(
        &self,
        id: &str,
        members: &[String],
    ) -> Result<Group, ServiceError> {
        Ok(self.graph.add_members(id, members).await?)
    }

    pub async fn remove_group_members(
        &self,
        id: &str,
        members: &[String],
    ) -> Result<Group, ServiceError> {
        Ok(self.graph.remove_members(id, members).await?)
    }

    // Resources

    #[tracing::instrument(skip(self, draft), fields(owner = %draft.owner))]
    pub async fn create_resource(&self, draft: ResourceDraft) -> Result<Resource, ServiceError> {
        draft.validate()?;
        self.get_user(&draft.owner).await?;

        let resource = Resource::new(self.ids.next_id(), draft.owner);
        self.repo.create(&resource).await?;
        tracing::info!(resource = %resource.id, "Resource created");
        Ok(resource)
    }

    pub async fn get_resource(&self, id: &str) -> Result<Resource, ServiceError> {
        self.repo
            .get(id)
            .await
            .map_err(lookup(EntityKind::Resource, id))
    }

    pub async fn delete_resource(&self, id: &str) -> Result<Resource, ServiceError> {
        Ok(self.graph.delete_resource(id).await?)
    }

    pub async fn list_resources(&self) -> Result<Vec<Resource>, ServiceError> {
        Ok(self.repo.list().await?)
    }

    // Policies

    #[tracing::instrument(skip(self, draft), fields(resource = %draft.resource))]
    pub async fn create_policy(&self, draft: PolicyDraft) -> Result<Policy, ServiceError> {
        draft.validate()?;
        if draft.action.iter().any(|a| a.trim().is_empty()) {
            return Err(ServiceError::Validation(
                "policy actions must not be blank".to_string(),
            ));
        }
        self.get_resource(&draft.resource).await?;
        for principal in &draft.principal {
            self.ensure_principal(principal).await?;
        }

        let policy = Policy::from_draft(self.ids.next_id(), draft);
        self.repo.create(&policy).await?;
        tracing::info!(policy = %policy.id(), effect = policy.effect.as_str(), "Policy created");
        Ok(policy)
    }

    pub async fn get_policy(&self, id: &str) -> Result<Policy, ServiceError> {
        self.repo
            .get(id)
            .await
            .map_err(lookup(EntityKind::Policy, id))
    }

    pub async fn delete_policy(&self, id: &str) -> Result<Policy, ServiceError> {
        self.repo
            .delete(id)
            .await
            .map_err(lookup(EntityKind::Policy, id))
    }

    pub async fn list_policies(&self) -> Result<Vec<Policy>, ServiceError> {
        Ok(self.repo.list().await?)
    }

    // Decisions

    pub async fn evaluate(&self, request: AccessRequest) -> Result<Challenge, ServiceError> {
        request.validate()?;
        Ok(self.engine.evaluate(request).await?)
    }

    pub async fn list_challenges(&self) -> Result<Vec<Challenge>, ServiceError> {
        Ok(self.repo.list().await?)
    }

    async fn ensure_principal(&self, id: &str) -> Result<(), ServiceError> {
        let doc = match self.repo.store().find_by_id(id).await {
            Ok(doc) => doc,
            Err(e) if e.is_not_found() => {
                return Err(ServiceError::UnknownPrincipal(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let kind = Entity::from_document(doc).map_err(StoreError::from)?.kind();
        match kind {
            EntityKind::User | EntityKind::Group => Ok(()),
            other => {
                tracing::debug!(principal = %id, kind = %other, "Rejected policy principal");
                Err(ServiceError::UnknownPrincipal(id.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;
    use mongodb::bson::doc;
    use crate::services::clock::{SystemClock, UuidGenerator};
    use crate::services::error::ErrorKind;
    use crate::store::MemoryStore;

    fn service() -> IamService {
        IamService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            Arc::new(UuidGenerator),
        )
    }

    async fn user(svc: &IamService, name: &str) -> User {
        svc.create_user(UserDraft {
            name: name.into(),
            email: format!("{}@example.org", name),
            role: String::new(),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn create_user_assigns_id_and_kind() {
        let svc = service();
        let created = user(&svc, "alice").await;

        assert!(!created.id.is_empty());
        assert_eq!(created.kind, EntityKind::User);
        assert_eq!(svc.get_user(&created.id).await.unwrap(), created);
        assert_eq!(
            svc.find_user_by_email("alice@example.org").await.unwrap().id,
            created.id
        );
    }

    #[tokio::test]
    async fn create_user_rejects_bad_email() {
        let svc = service();
        let err = svc
            .create_user(UserDraft {
                name: "bob".into(),
                email: "bob-at-example".into(),
                role: String::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn emails_are_unique() {
        let svc = service();
        user(&svc, "alice").await;

        let err = svc
            .create_user(UserDraft {
                name: "other".into(),
                email: "alice@example.org".into(),
                role: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn resource_owner_must_exist() {
        let svc = service();
        let err = svc
            .create_resource(ResourceDraft {
                owner: "ghost".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn policy_references_are_checked() {
        let svc = service();
        let owner = user(&svc, "owner").await;
        let resource = svc
            .create_resource(ResourceDraft {
                owner: owner.id.clone(),
            })
            .await
            .unwrap();

        let draft = |resource: &str, principal: &str, action: Vec<String>| PolicyDraft {
            resource: resource.into(),
            principal: vec![principal.into()],
            effect: None,
            action,
            issuer: String::new(),
        };

        let missing_resource = svc
            .create_policy(draft("nope", &owner.id, vec!["read".into()]))
            .await
            .unwrap_err();
        assert!(matches!(missing_resource, ServiceError::NotFound { .. }));

        let resource_as_principal = svc
            .create_policy(draft(&resource.id, &resource.id, vec!["read".into()]))
            .await
            .unwrap_err();
        assert!(matches!(
            resource_as_principal,
            ServiceError::UnknownPrincipal(_)
        ));

        let no_actions = svc
            .create_policy(draft(&resource.id, &owner.id, vec![]))
            .await
            .unwrap_err();
        assert_eq!(no_actions.kind(), ErrorKind::Validation);

        let policy = svc
            .create_policy(draft(&resource.id, &owner.id, vec!["read".into()]))
            .await
            .unwrap();
        assert_eq!(policy.effect, Effect::Allow);
        assert_eq!(svc.list_policies().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn end_to_end_group_grant_and_revocation() {
        let svc = service();
        let owner = user(&svc, "owner").await;
        let member = user(&svc, "member").await;
        let resource = svc
            .create_resource(ResourceDraft {
                owner: owner.id.clone(),
            })
            .await
            .unwrap();
        let group = svc
            .create_group(GroupDraft {
                name: "readers".into(),
                admin: owner.id.clone(),
                members: vec![member.id.clone()],
            })
            .await
            .unwrap();
        svc.create_policy(PolicyDraft {
            resource: resource.id.clone(),
            principal: vec![group.id.clone()],
            effect: Some(Effect::Allow),
            action: vec!["read".into()],
            issuer: String::new(),
        })
        .await
        .unwrap();

        let ask = || AccessRequest {
            principal: member.id.clone(),
            resource: resource.id.clone(),
            action: "read".into(),
            issuer: String::new(),
        };
        assert!(svc.evaluate(ask()).await.unwrap().granted);

        svc.delete_group(&group.id).await.unwrap();
        assert!(!svc.evaluate(ask()).await.unwrap().granted);
        assert_eq!(svc.list_challenges().await.unwrap().len(), 2);

        svc.delete_resource(&resource.id).await.unwrap();
        assert!(svc.list_policies().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn evaluate_rejects_blank_request() {
        let svc = service();
        let err = svc
            .evaluate(AccessRequest {
                principal: String::new(),
                resource: "r".into(),
                action: "read".into(),
                issuer: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn delete_policy_ignores_other_kinds() {
        let svc = service();
        let owner = user(&svc, "owner").await;
        let err = svc.delete_policy(&owner.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(svc.get_user(&owner.id).await.is_ok());
    }

    async fn resource(svc: &IamService, owner: &User) -> Resource {
        svc.create_resource(ResourceDraft {
            owner: owner.id.clone(),
        })
        .await
        .unwrap()
    }

    async fn grant(svc: &IamService, resource: &Resource, principal: &str, effect: Effect) -> Policy {
        svc.create_policy(PolicyDraft {
            resource: resource.id.clone(),
            principal: vec![principal.into()],
            effect: Some(effect),
            action: vec!["read".into()],
            issuer: String::new(),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn per_user_queries_follow_ownership_and_grants() {
        let svc = service();
        let owner = user(&svc, "owner").await;
        let member = user(&svc, "member").await;
        let outsider = user(&svc, "outsider").await;
        let owned = resource(&svc, &owner).await;
        let shared = resource(&svc, &outsider).await;
        let denied = resource(&svc, &outsider).await;
        let group = svc
            .create_group(GroupDraft {
                name: "readers".into(),
                admin: outsider.id.clone(),
                members: vec![member.id.clone()],
            })
            .await
            .unwrap();
        let via_group = grant(&svc, &shared, &group.id, Effect::Allow).await;
        let direct = grant(&svc, &denied, &member.id, Effect::Deny).await;
        // A grant on something the user already owns is not listed twice.
        grant(&svc, &owned, &owner.id, Effect::Allow).await;

        let owned_ids: Vec<String> = svc
            .list_owned_resources(&owner.id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(owned_ids, vec![owned.id.clone()]);
        assert!(svc.list_owned_resources(&member.id).await.unwrap().is_empty());

        let policy_ids: BTreeSet<String> = svc
            .list_user_policies(&member.id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        let expected: BTreeSet<String> = [via_group.id, direct.id].into_iter().collect();
        assert_eq!(policy_ids, expected);

        let access: Vec<String> = svc
            .list_user_access(&member.id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(access, vec![shared.id.clone()]);

        let access = svc.list_user_access(&owner.id).await.unwrap();
        assert_eq!(access.len(), 1);
        assert_eq!(access[0].id, owned.id);
    }

    #[tokio::test]
    async fn per_user_queries_require_the_user() {
        let svc = service();
        for err in [
            svc.list_owned_resources("ghost").await.unwrap_err(),
            svc.list_user_policies("ghost").await.unwrap_err(),
            svc.list_user_access("ghost").await.unwrap_err(),
        ] {
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }
    }

    #[tokio::test]
    async fn challenge_history_survives_user_deletion() {
        let svc = service();
        let owner = user(&svc, "owner").await;
        let asker = user(&svc, "asker").await;
        let target = resource(&svc, &owner).await;
        for action in ["read", "write"] {
            svc.evaluate(AccessRequest {
                principal: asker.id.clone(),
                resource: target.id.clone(),
                action: action.into(),
                issuer: String::new(),
            })
            .await
            .unwrap();
        }
        svc.evaluate(AccessRequest {
            principal: owner.id.clone(),
            resource: target.id.clone(),
            action: "read".into(),
            issuer: String::new(),
        })
        .await
        .unwrap();

        svc.delete_user(&asker.id).await.unwrap();

        let history = svc.list_user_challenges(&asker.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|c| c.principal == asker.id && !c.granted));
        assert!(svc.list_user_challenges("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_document_is_corrupt_data() {
        let svc = service();
        svc.repository()
            .store()
            .insert(doc! { "@id": "u1", "@type": "Person", "name": "x", "email": 5 })
            .await
            .unwrap();

        let err = svc.get_user("u1").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CorruptData);
        assert!(!err.is_retryable());
        let response = service_core::error::AppError::from(err).into_response();
        assert_eq!(
            response.status(),
            axum::http::StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
