//! # Rule Bridge Library
//!
//! Owns single rules inside shared, versioned web ACL rule lists. The remote
//! API only supports whole-container read/replace guarded by a version token;
//! this crate turns that into per-rule create/read/update/delete.

// Core modules
pub mod config;
pub mod error;
pub mod http;
pub mod memory;
pub mod reconciler;
pub mod repository;
pub mod retry;

// Re-export commonly used types
pub use config::{load_config_from_path, load_config_with, BackoffConfig, ConfigError, ReconcilerConfig};
pub use error::{ReconcileError, RepositoryError};
pub use http::HttpContainerRepository;
pub use memory::InMemoryRepository;
pub use reconciler::{Reconciler, RuleState};
pub use repository::ContainerRepository;
pub use retry::{ConflictRetryDriver, DriverPhase, MergePlan, SubmitReport};
