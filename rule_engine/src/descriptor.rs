// Structural identity of an owned rule
//
// Rules in a web ACL have no identifier of their own. A rule is recognised by
// its name plus the rule group it references: an ARN for customer rule
// groups, or (vendor, name, version) for managed ones. Absent and empty
// versions are the same value; a concrete version never equals an absent one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::rule::{Rule, Statement, MANAGED_RULE_GROUP_KEY, RULE_GROUP_REFERENCE_KEY};
use crate::validation::ValidationError;

/// Which statement variant an owned rule carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Custom,
    Managed,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Custom => "custom",
            RuleKind::Managed => "managed",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "custom" => Ok(RuleKind::Custom),
            "managed" => Ok(RuleKind::Managed),
            other => Err(ValidationError::InvalidRuleKind(other.to_string())),
        }
    }
}

/// Key fields of the referenced rule group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RuleGroupKey {
    Custom {
        arn: String,
    },
    Managed {
        vendor_name: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
}

impl RuleGroupKey {
    pub fn custom(arn: impl Into<String>) -> Self {
        RuleGroupKey::Custom { arn: arn.into() }
    }

    /// Managed key; an empty version is stored as absent.
    pub fn managed(
        vendor_name: impl Into<String>,
        name: impl Into<String>,
        version: Option<String>,
    ) -> Self {
        RuleGroupKey::Managed {
            vendor_name: vendor_name.into(),
            name: name.into(),
            version: normalize_version(version.as_deref()),
        }
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            RuleGroupKey::Custom { .. } => RuleKind::Custom,
            RuleGroupKey::Managed { .. } => RuleKind::Managed,
        }
    }

    /// Key of an owned statement. Owned blocks that did not decode strictly
    /// still yield their key fields; foreign statements yield `None`.
    pub fn from_statement(statement: &Statement) -> Option<Self> {
        match statement {
            Statement::RuleGroupReference(s) => Some(RuleGroupKey::custom(s.arn.clone())),
            Statement::ManagedRuleGroup(s) => Some(RuleGroupKey::managed(
                s.vendor_name.clone(),
                s.name.clone(),
                s.version.clone(),
            )),
            Statement::Opaque(block) => Self::from_block(block),
        }
    }

    /// Read only the key fields of a raw statement block.
    fn from_block(block: &Map<String, Value>) -> Option<Self> {
        if block.len() != 1 {
            return None;
        }
        if let Some(reference) = block.get(RULE_GROUP_REFERENCE_KEY) {
            let arn = reference.get("arn")?.as_str()?;
            return Some(RuleGroupKey::custom(arn));
        }
        let managed = block.get(MANAGED_RULE_GROUP_KEY)?;
        let vendor_name = managed.get("vendor_name")?.as_str()?;
        let name = managed.get("name")?.as_str()?;
        let version = match managed.get("version") {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_str()?.to_string()),
        };
        Some(RuleGroupKey::managed(vendor_name, name, version))
    }

    /// True when `statement` has this discriminant and equal key fields.
    pub fn matches(&self, statement: &Statement) -> bool {
        Self::from_statement(statement).as_ref() == Some(self)
    }

    /// The identifier used in import ids: the ARN, or `vendor:name[:version]`.
    pub fn identifier(&self) -> String {
        match self {
            RuleGroupKey::Custom { arn } => arn.clone(),
            RuleGroupKey::Managed {
                vendor_name,
                name,
                version: Some(version),
            } => format!("{}:{}:{}", vendor_name, name, version),
            RuleGroupKey::Managed {
                vendor_name, name, ..
            } => format!("{}:{}", vendor_name, name),
        }
    }
}

fn normalize_version(version: Option<&str>) -> Option<String> {
    match version {
        Some(v) if !v.is_empty() => Some(v.to_string()),
        _ => None,
    }
}

/// Canonical identity of an owned rule inside its container
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleDescriptor {
    pub name: String,
    pub key: RuleGroupKey,
}

impl RuleDescriptor {
    pub fn new(name: impl Into<String>, key: RuleGroupKey) -> Self {
        Self {
            name: name.into(),
            key,
        }
    }

    /// Descriptor of a fetched rule; `None` if its statement is not owned.
    pub fn from_rule(rule: &Rule) -> Option<Self> {
        RuleGroupKey::from_statement(&rule.statement).map(|key| Self::new(rule.name.clone(), key))
    }

    pub fn kind(&self) -> RuleKind {
        self.key.kind()
    }

    /// Name and key both match.
    pub fn identifies(&self, rule: &Rule) -> bool {
        self.name == rule.name && self.key.matches(&rule.statement)
    }
}

impl fmt::Display for RuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {})", self.name, self.kind(), self.key.identifier())
    }
}
