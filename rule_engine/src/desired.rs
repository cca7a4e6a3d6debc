// Desired state of one owned rule, as declared by the caller
//
// The payload mirrors the remote rule but keeps the statement as two optional
// blocks so that "both set" and "neither set" are representable and can be
// rejected with a clear error before anything is fetched.

use serde::{Deserialize, Serialize};

use crate::descriptor::{RuleDescriptor, RuleGroupKey};
use crate::rule::{
    ManagedRuleGroupStatement, OverrideAction, RuleActionOverride, RuleGroupReferenceStatement,
    Statement, VisibilityConfig,
};
use crate::validation::{
    check_length, is_arn, ValidationError, MAX_NAME_LEN, MAX_VERSION_LEN, RESPONSE_CODE_RANGE,
};

/// Statement blocks of a desired rule; exactly one must be set
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleStatementSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_group_reference: Option<RuleGroupReferenceStatement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_rule_group: Option<ManagedRuleGroupStatement>,
}

impl RuleStatementSpec {
    pub fn custom(statement: RuleGroupReferenceStatement) -> Self {
        Self {
            rule_group_reference: Some(statement),
            managed_rule_group: None,
        }
    }

    pub fn managed(statement: ManagedRuleGroupStatement) -> Self {
        Self {
            rule_group_reference: None,
            managed_rule_group: Some(statement),
        }
    }

    /// The single populated statement.
    pub fn resolve(&self) -> Result<Statement, ValidationError> {
        match (&self.rule_group_reference, &self.managed_rule_group) {
            (Some(reference), None) => Ok(Statement::RuleGroupReference(reference.clone())),
            (None, Some(managed)) => Ok(Statement::ManagedRuleGroup(managed.clone())),
            (None, None) => Err(ValidationError::StatementCount { found: 0 }),
            (Some(_), Some(_)) => Err(ValidationError::StatementCount { found: 2 }),
        }
    }

    /// Spec for an owned statement; `None` for opaque ones.
    pub fn from_statement(statement: &Statement) -> Option<Self> {
        match statement {
            Statement::RuleGroupReference(s) => Some(Self::custom(s.clone())),
            Statement::ManagedRuleGroup(s) => Some(Self::managed(s.clone())),
            Statement::Opaque(_) => None,
        }
    }
}

/// Caller's desired payload for one rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DesiredRule {
    pub name: String,
    pub priority: i32,
    pub statement: RuleStatementSpec,
    #[serde(default)]
    pub override_action: OverrideAction,
    /// `None` means "use the generated default".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility_config: Option<VisibilityConfig>,
}

impl DesiredRule {
    pub fn new(name: impl Into<String>, priority: i32, statement: RuleStatementSpec) -> Self {
        Self {
            name: name.into(),
            priority,
            statement,
            override_action: OverrideAction::None,
            visibility_config: None,
        }
    }

    pub fn with_override_action(mut self, action: OverrideAction) -> Self {
        self.override_action = action;
        self
    }

    pub fn with_visibility_config(mut self, config: VisibilityConfig) -> Self {
        self.visibility_config = Some(config);
        self
    }

    /// Validate the payload and return its statement.
    pub fn validate(&self) -> Result<Statement, ValidationError> {
        check_length("name", &self.name, 1, MAX_NAME_LEN)?;
        if self.priority < 0 {
            return Err(ValidationError::NegativePriority(self.priority));
        }

        let statement = self.statement.resolve()?;
        match &statement {
            Statement::RuleGroupReference(s) => {
                if !is_arn(&s.arn) {
                    return Err(ValidationError::InvalidArn(s.arn.clone()));
                }
            }
            Statement::ManagedRuleGroup(s) => {
                check_length("vendor_name", &s.vendor_name, 1, MAX_NAME_LEN)?;
                check_length("managed_rule_group.name", &s.name, 1, MAX_NAME_LEN)?;
                if let Some(version) = &s.version {
                    check_length("version", version, 0, MAX_VERSION_LEN)?;
                }
                for config in &s.managed_rule_group_configs {
                    config.validate()?;
                }
            }
            Statement::Opaque(_) => return Err(ValidationError::StatementCount { found: 0 }),
        }
        validate_overrides(statement.rule_action_overrides())?;

        if let Some(config) = &self.visibility_config {
            check_length("metric_name", &config.metric_name, 1, MAX_NAME_LEN)?;
        }
        Ok(statement)
    }

    /// Identity of the rule this payload describes.
    pub fn descriptor(&self) -> Result<RuleDescriptor, ValidationError> {
        let statement = self.statement.resolve()?;
        RuleGroupKey::from_statement(&statement)
            .map(|key| RuleDescriptor::new(self.name.clone(), key))
            .ok_or(ValidationError::StatementCount { found: 0 })
    }
}

fn validate_overrides(overrides: &[RuleActionOverride]) -> Result<(), ValidationError> {
    for entry in overrides {
        check_length("rule_action_override.name", &entry.name, 1, MAX_NAME_LEN)?;
        if let Some(response) = entry.action_to_use.custom_response() {
            if !RESPONSE_CODE_RANGE.contains(&response.response_code) {
                return Err(ValidationError::InvalidResponseCode(response.response_code));
            }
        }
    }
    Ok(())
}
