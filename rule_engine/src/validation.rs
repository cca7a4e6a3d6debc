// Validation errors for rule payloads, identifiers and configuration blocks.
//
// Everything in here is a configuration problem: none of these errors are
// transient, so callers surface them immediately instead of retrying.

use thiserror::Error;

/// Maximum length of a rule name, rule group name, vendor name or metric name.
pub const MAX_NAME_LEN: usize = 128;
/// Maximum length of a managed rule group version.
pub const MAX_VERSION_LEN: usize = 64;
/// Allowed range for custom response codes in action overrides.
pub const RESPONSE_CODE_RANGE: std::ops::RangeInclusive<u16> = 200..=600;

/// Validation error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Exactly one of rule_group_reference or managed_rule_group is required, found {found}")]
    StatementCount { found: usize },

    #[error("Statement mixes {0:?}: a rule carries exactly one statement")]
    AmbiguousStatement(Vec<String>),

    #[error("Invalid {field}: length must be between {min} and {max}, got {actual}")]
    Length {
        field: &'static str,
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("Invalid priority {0}: must be zero or greater")]
    NegativePriority(i32),

    #[error("Invalid ARN: {0}")]
    InvalidArn(String),

    #[error("Invalid web ACL ARN {arn}: {reason}")]
    InvalidContainerArn { arn: String, reason: String },

    #[error("Invalid scope {0:?}: expected REGIONAL or CLOUDFRONT")]
    InvalidScope(String),

    #[error("Invalid override action {0:?}: expected 'none' or 'count'")]
    InvalidOverrideAction(String),

    #[error("Rule group type must be 'custom' or 'managed', got: {0}")]
    InvalidRuleKind(String),

    #[error("Unexpected import identifier {id:?} ({reason}): expected web_acl_arn,rule_name,rule_group_type,rule_group_identifier")]
    InvalidImportId { id: String, reason: String },

    #[error("Unrecognized managed rule group configuration variant: {0}")]
    UnknownConfigVariant(String),

    #[error("Managed rule group configuration must set exactly one variant, found {0}")]
    ConfigVariantCount(usize),

    #[error("Malformed {kind}: {reason}")]
    Malformed { kind: &'static str, reason: String },

    #[error("Invalid response code {0}: must be between 200 and 600")]
    InvalidResponseCode(u16),

    #[error("{field} cannot change from {from:?} to {to:?} without replacing the rule")]
    RequiresReplacement {
        field: &'static str,
        from: String,
        to: String,
    },
}

/// Check that `value` has between `min` and `max` characters.
pub(crate) fn check_length(
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<(), ValidationError> {
    let actual = value.chars().count();
    if actual < min || actual > max {
        return Err(ValidationError::Length {
            field,
            min,
            max,
            actual,
        });
    }
    Ok(())
}

/// Loose ARN shape check: `arn:partition:service:region:account:resource`.
pub fn is_arn(value: &str) -> bool {
    let parts: Vec<&str> = value.splitn(6, ':').collect();
    parts.len() == 6
        && parts[0] == "arn"
        && !parts[1].is_empty()
        && !parts[2].is_empty()
        && !parts[5].is_empty()
}
