// Resource identifiers: web ACL ARNs, composite ids and import ids
//
// A web ACL ARN has the shape
//   arn:<partition>:wafv2:<region>:<account>:<scope>/webacl/<name>/<id>
// where a `global` region or scope segment means CLOUDFRONT.
//
// Import ids name one owned rule without any remote call:
//   <web_acl_arn>,<rule_name>,<custom|managed>,<identifier>
// The identifier is the rule group ARN for custom rules and
// `vendor:name[:version]` for managed ones.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::descriptor::{RuleDescriptor, RuleGroupKey, RuleKind};
use crate::rule::{ContainerKey, Scope};
use crate::validation::{is_arn, ValidationError};

const IMPORT_ID_SEPARATOR: char = ',';
const IMPORT_ID_PART_COUNT: usize = 4;

/// Parse a web ACL ARN into the container key it addresses.
pub fn parse_container_arn(arn: &str) -> Result<ContainerKey, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidContainerArn {
        arn: arn.to_string(),
        reason,
    };

    let parts: Vec<&str> = arn.split(':').collect();
    if parts.len() < 6 {
        return Err(invalid("expected at least 6 ':' separated parts".to_string()));
    }

    let resource: Vec<&str> = parts[5].split('/').collect();
    if resource.len() < 4 {
        return Err(invalid(format!("invalid resource format: {}", parts[5])));
    }
    if resource[1] != "webacl" {
        return Err(invalid(format!(
            "expected webacl resource type, got {}",
            resource[1]
        )));
    }

    let scope = if parts[3] == "global" || resource[0] == "global" {
        Scope::Cloudfront
    } else {
        Scope::Regional
    };
    let name = resource[resource.len() - 2];
    let id = resource[resource.len() - 1];
    if name.is_empty() || id.is_empty() {
        return Err(invalid("web ACL name and id must not be empty".to_string()));
    }

    Ok(ContainerKey::new(id, name, scope))
}

/// Where an owned rule lives and how it is recognised
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleIdentity {
    pub container_arn: String,
    pub container: ContainerKey,
    pub descriptor: RuleDescriptor,
}

impl RuleIdentity {
    pub fn new(
        container_arn: impl Into<String>,
        descriptor: RuleDescriptor,
    ) -> Result<Self, ValidationError> {
        let container_arn = container_arn.into();
        let container = parse_container_arn(&container_arn)?;
        Ok(Self {
            container_arn,
            container,
            descriptor,
        })
    }

    /// Composite id: `container_id/container_name/scope/rule_name`.
    pub fn resource_id(&self) -> String {
        format!("{}/{}", self.container, self.descriptor.name)
    }

    /// Import id that parses back into this identity.
    pub fn import_id(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}{sep}{}",
            self.container_arn,
            self.descriptor.name,
            self.descriptor.kind(),
            self.descriptor.key.identifier(),
            sep = IMPORT_ID_SEPARATOR
        )
    }

    /// Parse an import id. Performs no remote calls.
    pub fn parse_import_id(id: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidImportId {
            id: id.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = id.split(IMPORT_ID_SEPARATOR).collect();
        if parts.len() != IMPORT_ID_PART_COUNT {
            return Err(invalid("expected 4 comma separated parts"));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("parts must not be empty"));
        }

        let (container_arn, rule_name, kind, identifier) = (parts[0], parts[1], parts[2], parts[3]);
        let key = match kind.parse::<RuleKind>()? {
            RuleKind::Custom => {
                if !is_arn(identifier) {
                    return Err(invalid("custom rule group identifier should be an ARN"));
                }
                RuleGroupKey::custom(identifier)
            }
            RuleKind::Managed => {
                let segments: Vec<&str> = identifier.split(':').collect();
                match segments.as_slice() {
                    [vendor, name] if !vendor.is_empty() && !name.is_empty() => {
                        RuleGroupKey::managed(*vendor, *name, None)
                    }
                    [vendor, name, version] if !vendor.is_empty() && !name.is_empty() => {
                        RuleGroupKey::managed(*vendor, *name, Some(version.to_string()))
                    }
                    _ => {
                        return Err(invalid(
                            "managed rule group identifier should be in format 'vendorName:ruleName[:version]'",
                        ))
                    }
                }
            }
        };

        RuleIdentity::new(container_arn, RuleDescriptor::new(rule_name, key))
    }
}

impl FromStr for RuleIdentity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleIdentity::parse_import_id(s)
    }
}

impl fmt::Display for RuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource_id())
    }
}
