//! Whole-container access to a remote web ACL.
//!
//! The remote API has no per-rule endpoint: a web ACL is read with its version
//! token and replaced wholesale with the token it was read at. Implementations
//! never retry; retry policy lives in [`crate::retry`].

use async_trait::async_trait;
use std::sync::Arc;

use rule_engine::{Container, ContainerKey, Rule, VersionToken};

use crate::error::RepositoryError;

#[async_trait]
pub trait ContainerRepository: Send + Sync {
    /// Read the container and its current version token.
    async fn fetch(&self, key: &ContainerKey) -> Result<Container, RepositoryError>;

    /// Replace the rule list if `token` is still current. Returns the next token.
    async fn replace(
        &self,
        key: &ContainerKey,
        rules: Vec<Rule>,
        token: &VersionToken,
    ) -> Result<VersionToken, RepositoryError>;
}

#[async_trait]
impl<R: ContainerRepository + ?Sized> ContainerRepository for Arc<R> {
    async fn fetch(&self, key: &ContainerKey) -> Result<Container, RepositoryError> {
        (**self).fetch(key).await
    }

    async fn replace(
        &self,
        key: &ContainerKey,
        rules: Vec<Rule>,
        token: &VersionToken,
    ) -> Result<VersionToken, RepositoryError> {
        (**self).replace(key, rules, token).await
    }
}
