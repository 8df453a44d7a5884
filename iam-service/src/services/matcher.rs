use std::collections::BTreeSet;

use super::repository::Repository;
use crate::models::{
    Effect, EntityKind, Policy, POLICY_ACTION_FIELD, POLICY_EFFECT_FIELD, POLICY_PRINCIPAL_FIELD,
    POLICY_RESOURCE_FIELD, WILDCARD_ACTION,
};
use crate::store::{Filter, StoreError};

/// Finds Allow policies that grant an action on a resource to an identity set.
#[derive(Clone)]
pub struct PolicyMatcher {
    repo: Repository,
}

impl PolicyMatcher {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// All matching policies; empty means no grant. Matching is exact string
    /// set intersection, with `*` as the only wildcard.
    pub async fn find_granting_policies(
        &self,
        resource: &str,
        action: &str,
        identities: &BTreeSet<String>,
    ) -> Result<Vec<Policy>, StoreError> {
        if identities.is_empty() {
            return Ok(Vec::new());
        }

        let filter = Filter::kind(EntityKind::Policy)
            .eq(POLICY_EFFECT_FIELD, Effect::Allow.as_str())
            .eq(POLICY_RESOURCE_FIELD, resource)
            .any_of(POLICY_ACTION_FIELD, [action, WILDCARD_ACTION])
            .any_of(POLICY_PRINCIPAL_FIELD, identities.iter().cloned());

        let policies: Vec<Policy> = self.repo.find(&filter).await?;
        let matched: Vec<Policy> = policies
            .into_iter()
            .filter(|p| p.grants(resource, action, identities))
            .collect();

        tracing::debug!(
            resource = %resource,
            action = %action,
            matches = matched.len(),
            "Policy lookup complete"
        );
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn ids(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    async fn matcher_with(policies: Vec<Policy>) -> PolicyMatcher {
        let repo = Repository::new(Arc::new(MemoryStore::new()));
        for p in &policies {
            repo.create(p).await.unwrap();
        }
        PolicyMatcher::new(repo)
    }

    fn policy(id: &str, principals: &[&str], actions: &[&str], effect: Effect) -> Policy {
        Policy {
            id: id.into(),
            kind: EntityKind::Policy,
            resource: "r1".into(),
            principal: ids(principals),
            effect,
            action: ids(actions),
            issuer: String::new(),
        }
    }

    #[tokio::test]
    async fn matches_on_group_membership() {
        let matcher =
            matcher_with(vec![policy("p1", &["g1"], &["read"], Effect::Allow)]).await;

        let found = matcher
            .find_granting_policies("r1", "read", &ids(&["u1", "g1"]))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let none = matcher
            .find_granting_policies("r1", "read", &ids(&["u1"]))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn returns_every_matching_policy() {
        let matcher = matcher_with(vec![
            policy("p1", &["u1"], &["read"], Effect::Allow),
            policy("p2", &["u1"], &["*"], Effect::Allow),
            policy("p3", &["u1"], &["write"], Effect::Allow),
        ])
        .await;

        let found = matcher
            .find_granting_policies("r1", "read", &ids(&["u1"]))
            .await
            .unwrap();
        let found: Vec<_> = found.into_iter().map(|p| p.id).collect();
        assert_eq!(found, vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn deny_policies_are_ignored() {
        let matcher = matcher_with(vec![policy("p1", &["u1"], &["read"], Effect::Deny)]).await;

        let found = matcher
            .find_granting_policies("r1", "read", &ids(&["u1"]))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn wildcard_is_a_sentinel_not_a_pattern() {
        let matcher =
            matcher_with(vec![policy("p1", &["u1"], &["re*"], Effect::Allow)]).await;

        let found = matcher
            .find_granting_policies("r1", "read", &ids(&["u1"]))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn empty_identity_set_matches_nothing() {
        let matcher =
            matcher_with(vec![policy("p1", &["u1"], &["*"], Effect::Allow)]).await;

        let found = matcher
            .find_granting_policies("r1", "read", &BTreeSet::new())
            .await
            .unwrap();
        assert!(found.is_empty());
    }
}
