//! HTTP gateway adapter for [`ContainerRepository`].
//!
//! Talks JSON to a gateway exposing the remote get/replace pair:
//!
//! - `GET  {base}/containers/{scope}/{name}/{id}` returns the container document
//! - `PUT  {base}/containers/{scope}/{name}/{id}` with `{rules, version_token}`
//!   returns `{next_version_token}`
//!
//! Status mapping: 404 is NotFound, 409 is a version conflict, 423 and 503 are
//! "temporarily unavailable", anything else non-2xx is a remote error.

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use rule_engine::{Container, ContainerKey, Rule, VersionToken};

use crate::error::RepositoryError;
use crate::repository::ContainerRepository;

#[derive(Debug, Deserialize)]
struct ContainerDocument {
    #[serde(default)]
    arn: Option<String>,
    version_token: VersionToken,
    #[serde(default)]
    rules: Vec<Rule>,
}

#[derive(Debug, Serialize)]
struct ReplaceRequest<'a> {
    rules: &'a [Rule],
    version_token: &'a VersionToken,
}

#[derive(Debug, Deserialize)]
struct ReplaceResponse {
    next_version_token: VersionToken,
}

/// reqwest-backed repository.
#[derive(Debug, Clone)]
pub struct HttpContainerRepository {
    client: Client,
    base_url: String,
}

impl HttpContainerRepository {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, RepositoryError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RepositoryError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn container_url(&self, key: &ContainerKey) -> String {
        format!(
            "{}/containers/{}/{}/{}",
            self.base_url, key.scope, key.name, key.id
        )
    }
}

/// Map a non-success status to a repository error.
pub fn classify_status(
    key: &ContainerKey,
    token: Option<&VersionToken>,
    status: u16,
    message: String,
) -> RepositoryError {
    match status {
        404 => RepositoryError::not_found(key),
        409 => RepositoryError::VersionConflict {
            container: key.to_string(),
            token: token.map(|t| t.to_string()).unwrap_or_default(),
        },
        423 | 503 => RepositoryError::Unavailable {
            container: key.to_string(),
            message,
        },
        _ => RepositoryError::Remote { status, message },
    }
}

#[async_trait]
impl ContainerRepository for HttpContainerRepository {
    async fn fetch(&self, key: &ContainerKey) -> Result<Container, RepositoryError> {
        let url = self.container_url(key);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RepositoryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(key, None, status.as_u16(), body));
        }

        let document = response
            .json::<ContainerDocument>()
            .await
            .map_err(|e| RepositoryError::Transport(format!("invalid container document: {}", e)))?;

        Ok(Container {
            key: key.clone(),
            arn: document.arn,
            version_token: document.version_token,
            rules: document.rules,
        })
    }

    async fn replace(
        &self,
        key: &ContainerKey,
        rules: Vec<Rule>,
        token: &VersionToken,
    ) -> Result<VersionToken, RepositoryError> {
        let url = self.container_url(key);
        debug!("PUT {} ({} rules, token {})", url, rules.len(), token);

        let response = self
            .client
            .put(&url)
            .json(&ReplaceRequest {
                rules: &rules,
                version_token: token,
            })
            .send()
            .await
            .map_err(|e| RepositoryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(key, Some(token), status.as_u16(), body));
        }

        let replaced = response
            .json::<ReplaceResponse>()
            .await
            .map_err(|e| RepositoryError::Transport(format!("invalid replace response: {}", e)))?;
        Ok(replaced.next_version_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rule_engine::Scope;

    fn key() -> ContainerKey {
        ContainerKey::new("e5f6", "cdn-acl", Scope::Cloudfront)
    }

    #[test]
    fn test_classify_status() {
        let token = VersionToken::new("abc");

        assert_eq!(
            classify_status(&key(), None, 404, String::new()),
            RepositoryError::NotFound("e5f6/cdn-acl/CLOUDFRONT".to_string())
        );
        assert!(classify_status(&key(), Some(&token), 409, String::new()).is_conflict());
        assert!(classify_status(&key(), None, 423, "locked".to_string()).is_conflict());
        assert!(classify_status(&key(), None, 503, "busy".to_string()).is_conflict());
        assert_eq!(
            classify_status(&key(), None, 400, "bad rule".to_string()),
            RepositoryError::Remote {
                status: 400,
                message: "bad rule".to_string()
            }
        );
    }

    #[test]
    fn test_container_url() {
        let repo = HttpContainerRepository::with_client(Client::new(), "http://gateway.local/");
        assert_eq!(
            repo.container_url(&key()),
            "http://gateway.local/containers/CLOUDFRONT/cdn-acl/e5f6"
        );
    }

    #[test]
    fn test_replace_request_shape() {
        let token = VersionToken::new("abc");
        let body = serde_json::to_value(ReplaceRequest {
            rules: &[],
            version_token: &token,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"rules": [], "version_token": "abc"}));
    }
}
