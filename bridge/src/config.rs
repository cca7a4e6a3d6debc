//! Reconciler configuration.
//!
//! Loading flow:
//! 1. Start with [`ReconcilerConfig::default()`]
//! 2. If a JSON file is given and exists, deep-merge its values over the defaults
//! 3. Apply `RULE_BRIDGE_*` environment overrides (highest priority)
//!
//! Invalid environment values are ignored with a warning.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::map::Entry;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default per-operation timeout: 30 minutes.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30 * 60;
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

const ENV_PREFIX: &str = "RULE_BRIDGE_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Exponential backoff between conflict retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Symmetric jitter range, 0.0 to 1.0.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}
fn default_timeout_secs() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_SECS
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

/// Timeouts and retry policy of the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_timeout_secs")]
    pub create_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub update_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub delete_timeout_secs: u64,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            create_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            update_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            delete_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            backoff: BackoffConfig::default(),
        }
    }
}

impl ReconcilerConfig {
    pub fn create_timeout(&self) -> Duration {
        Duration::from_secs(self.create_timeout_secs)
    }

    pub fn update_timeout(&self) -> Duration {
        Duration::from_secs(self.update_timeout_secs)
    }

    pub fn delete_timeout(&self) -> Duration {
        Duration::from_secs(self.delete_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("create_timeout_secs", self.create_timeout_secs),
            ("update_timeout_secs", self.update_timeout_secs),
            ("delete_timeout_secs", self.delete_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.backoff.base_delay_ms > self.backoff.max_delay_ms {
            return Err(ConfigError::Invalid {
                field: "backoff.base_delay_ms",
                reason: format!(
                    "{} exceeds max_delay_ms {}",
                    self.backoff.base_delay_ms, self.backoff.max_delay_ms
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter_factor) {
            return Err(ConfigError::Invalid {
                field: "backoff.jitter_factor",
                reason: format!("{} is outside 0.0..=1.0", self.backoff.jitter_factor),
            });
        }
        Ok(())
    }

    /// Apply `RULE_BRIDGE_*` overrides read through `lookup`.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read_u64 = |suffix: &str, min: u64, max: u64| -> Option<u64> {
            let name = format!("{}{}", ENV_PREFIX, suffix);
            let raw = lookup(&name)?;
            let parsed = parse_u64_range(&raw, min, max);
            if parsed.is_none() {
                warn!("Ignoring invalid value {:?} for {}", raw, name);
            }
            parsed
        };

        if let Some(v) = read_u64("CREATE_TIMEOUT_SECS", 1, 86_400) {
            self.create_timeout_secs = v;
        }
        if let Some(v) = read_u64("UPDATE_TIMEOUT_SECS", 1, 86_400) {
            self.update_timeout_secs = v;
        }
        if let Some(v) = read_u64("DELETE_TIMEOUT_SECS", 1, 86_400) {
            self.delete_timeout_secs = v;
        }
        if let Some(v) = read_u64("BACKOFF_BASE_MS", 0, 600_000) {
            self.backoff.base_delay_ms = v;
        }
        if let Some(v) = read_u64("BACKOFF_MAX_MS", 0, 3_600_000) {
            self.backoff.max_delay_ms = v;
        }
    }

}

/// Load configuration from `path` (defaults if it does not exist), then apply
/// environment overrides and validate.
pub fn load_config_from_path(path: &Path) -> Result<ReconcilerConfig, ConfigError> {
    load_config_with(path, |name| {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    })
}

/// Same as [`load_config_from_path`], reading overrides through `lookup`
/// instead of the process environment.
pub fn load_config_with<F>(path: &Path, lookup: F) -> Result<ReconcilerConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut merged = serde_json::to_value(ReconcilerConfig::default())?;

    if path.exists() {
        debug!("Loading reconciler config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        overlay(&mut merged, user);
    } else {
        debug!("Config file {} not found, using defaults", path.display());
    }

    let mut config: ReconcilerConfig = serde_json::from_value(merged)?;
    config.apply_overrides_from(lookup);
    config.validate()?;
    Ok(config)
}

/// Write `user` over `base` in place. Nested objects are walked key by key and
/// explicit nulls keep the base value. Anything else in `user` wins.
fn overlay(base: &mut Value, user: Value) {
    match (base, user) {
        (Value::Object(base_fields), Value::Object(user_fields)) => {
            for (field, value) in user_fields.into_iter().filter(|(_, v)| !v.is_null()) {
                match base_fields.entry(field) {
                    Entry::Occupied(mut slot) => overlay(slot.get_mut(), value),
                    Entry::Vacant(slot) => {
                        slot.insert(value);
                    }
                }
            }
        }
        (base, user) => *base = user,
    }
}

fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
