//! In-memory container store with version-token semantics.
//!
//! Behaves like the remote API: every successful replace bumps the token to
//! `v{n+1}` and a stale token is rejected with a conflict. Used by embedders
//! and by the test suites.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use rule_engine::{Container, ContainerKey, Rule, VersionToken};

use crate::error::RepositoryError;
use crate::repository::ContainerRepository;

#[derive(Debug, Clone)]
struct StoredContainer {
    arn: Option<String>,
    version: u64,
    rules: Vec<Rule>,
}

impl StoredContainer {
    fn token(&self) -> VersionToken {
        VersionToken::new(format!("v{}", self.version))
    }
}

/// Thread-safe in-memory implementation of [`ContainerRepository`].
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    containers: RwLock<HashMap<ContainerKey, StoredContainer>>,
    writes: AtomicU64,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite a container at version `v1`.
    pub fn put_container(&self, key: ContainerKey, arn: Option<String>, rules: Vec<Rule>) -> VersionToken {
        let stored = StoredContainer {
            arn,
            version: 1,
            rules,
        };
        let token = stored.token();
        self.containers.write().insert(key, stored);
        token
    }

    /// Current state of a container, if present.
    pub fn snapshot(&self, key: &ContainerKey) -> Option<Container> {
        self.containers.read().get(key).map(|stored| Container {
            key: key.clone(),
            arn: stored.arn.clone(),
            version_token: stored.token(),
            rules: stored.rules.clone(),
        })
    }

    pub fn remove_container(&self, key: &ContainerKey) -> bool {
        self.containers.write().remove(key).is_some()
    }

    /// Number of successful replaces across all containers.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRepository for InMemoryRepository {
    async fn fetch(&self, key: &ContainerKey) -> Result<Container, RepositoryError> {
        self.snapshot(key)
            .ok_or_else(|| RepositoryError::not_found(key))
    }

    async fn replace(
        &self,
        key: &ContainerKey,
        rules: Vec<Rule>,
        token: &VersionToken,
    ) -> Result<VersionToken, RepositoryError> {
        let mut containers = self.containers.write();
        let stored = containers
            .get_mut(key)
            .ok_or_else(|| RepositoryError::not_found(key))?;

        if stored.token() != *token {
            return Err(RepositoryError::conflict(key, token));
        }

        stored.rules = rules;
        stored.version += 1;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rule_engine::Scope;

    fn key() -> ContainerKey {
        ContainerKey::new("a1", "shop-acl", Scope::Regional)
    }

    #[tokio::test]
    async fn test_replace_bumps_token() {
        let repo = InMemoryRepository::new();
        let token = repo.put_container(key(), None, vec![]);
        assert_eq!(token.as_str(), "v1");

        let next = repo.replace(&key(), vec![], &token).await.unwrap();
        assert_eq!(next.as_str(), "v2");
        assert_eq!(repo.fetch(&key()).await.unwrap().version_token, next);
        assert_eq!(repo.write_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_token_conflicts() {
        let repo = InMemoryRepository::new();
        let stale = repo.put_container(key(), None, vec![]);
        repo.replace(&key(), vec![], &stale).await.unwrap();

        let err = repo.replace(&key(), vec![], &stale).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(repo.write_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_container() {
        let repo = InMemoryRepository::new();
        assert!(matches!(
            repo.fetch(&key()).await,
            Err(RepositoryError::NotFound(_))
        ));
        assert!(matches!(
            repo.replace(&key(), vec![], &VersionToken::new("v1")).await,
            Err(RepositoryError::NotFound(_))
        ));
    }
}
