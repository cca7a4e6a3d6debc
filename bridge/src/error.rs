//! Error taxonomy for repository access and reconciliation.
//!
//! Only version conflicts and "temporarily unavailable" responses are
//! retryable. Everything else is surfaced to the caller as-is.

use rule_engine::{ContainerKey, InvariantError, MergeError, ValidationError, VersionToken};
use thiserror::Error;

/// Errors raised by a [`crate::repository::ContainerRepository`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("Web ACL {0} not found")]
    NotFound(String),

    #[error("Web ACL {container} changed since version {token} was read")]
    VersionConflict { container: String, token: String },

    #[error("Web ACL {container} is temporarily unavailable: {message}")]
    Unavailable { container: String, message: String },

    #[error("Remote error (status {status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl RepositoryError {
    pub fn not_found(key: &ContainerKey) -> Self {
        RepositoryError::NotFound(key.to_string())
    }

    pub fn conflict(key: &ContainerKey, token: &VersionToken) -> Self {
        RepositoryError::VersionConflict {
            container: key.to_string(),
            token: token.to_string(),
        }
    }

    /// Stale token or transient unavailability.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            RepositoryError::VersionConflict { .. } | RepositoryError::Unavailable { .. }
        )
    }
}

/// Errors returned by the reconciler and the conflict retry driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Invariant(#[from] InvariantError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("Rule {rule} not found in Web ACL {container}")]
    RuleNotFound { rule: String, container: String },

    #[error("Operation cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    /// The deadline passed before any attempt produced an underlying error.
    #[error("Timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },
}

impl ReconcileError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconcileError::Repository(e) if e.is_conflict())
    }
}
