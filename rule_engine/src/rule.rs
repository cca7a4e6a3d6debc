// Rule list data model for a shared web ACL
//
// This module provides:
// 1. Container identity (id, name, scope) and the opaque version token
// 2. Rules, their statements and rule action overrides
// 3. The visibility-config default and its "is default" predicate
//
// A rule has no server-assigned identifier. Identity is structural and lives
// in `descriptor.rs`. Statements are a closed union over the two rule group
// reference kinds this engine owns, plus an opaque variant for anything that
// does not parse strictly as one of them.
//
// A rule decoded from the wire remembers the exact JSON it was decoded from
// and, while left unmodified, serializes back to it. Rules the merge does not touch therefore reach
// the remote field-for-field as fetched, whatever defaults the typed view
// fills in.

use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::managed_config::ManagedRuleGroupConfig;
use crate::validation::ValidationError;

/// Statement key for a custom rule group reference.
pub const RULE_GROUP_REFERENCE_KEY: &str = "rule_group_reference";
/// Statement key for a managed rule group.
pub const MANAGED_RULE_GROUP_KEY: &str = "managed_rule_group";

// ============================================================================
// Container
// ============================================================================

/// Scope of a web ACL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    /// Regional resources (load balancers, API gateways, ...)
    Regional,
    /// Global distribution
    Cloudfront,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Regional => "REGIONAL",
            Scope::Cloudfront => "CLOUDFRONT",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REGIONAL" => Ok(Scope::Regional),
            "CLOUDFRONT" => Ok(Scope::Cloudfront),
            other => Err(ValidationError::InvalidScope(other.to_string())),
        }
    }
}

/// Identity of a web ACL: stable for the lifetime of the remote object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerKey {
    pub id: String,
    pub name: String,
    pub scope: Scope,
}

impl ContainerKey {
    pub fn new(id: impl Into<String>, name: impl Into<String>, scope: Scope) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            scope,
        }
    }
}

impl fmt::Display for ContainerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.id, self.name, self.scope)
    }
}

/// Opaque optimistic-concurrency token returned on fetch and required on replace
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fetched web ACL: the shared rule list plus the token it was read at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub key: ContainerKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    pub version_token: VersionToken,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

// ============================================================================
// Rule
// ============================================================================

/// Override action applied to a rule group's own rule actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideAction {
    /// Keep the rule group's actions
    #[default]
    None,
    /// Count matches only
    Count,
}

impl OverrideAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideAction::None => "none",
            OverrideAction::Count => "count",
        }
    }
}

impl FromStr for OverrideAction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(OverrideAction::None),
            "count" => Ok(OverrideAction::Count),
            other => Err(ValidationError::InvalidOverrideAction(other.to_string())),
        }
    }
}

/// Telemetry settings of a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityConfig {
    pub sampled_requests_enabled: bool,
    pub cloudwatch_metrics_enabled: bool,
    pub metric_name: String,
}

impl VisibilityConfig {
    /// The configuration applied when the caller does not supply one.
    pub fn default_for(rule_name: &str) -> Self {
        Self {
            sampled_requests_enabled: true,
            cloudwatch_metrics_enabled: true,
            metric_name: rule_name.to_string(),
        }
    }

    /// True when this is exactly what `default_for(rule_name)` generates.
    pub fn is_default_for(&self, rule_name: &str) -> bool {
        self.sampled_requests_enabled
            && self.cloudwatch_metrics_enabled
            && self.metric_name == rule_name
    }
}

/// One entry of a web ACL rule list
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub priority: i32,
    pub statement: Statement,
    pub override_action: Option<OverrideAction>,
    pub visibility_config: VisibilityConfig,
    /// Fields this engine does not model (actions, labels, captcha config...)
    pub extra: Map<String, Value>,
    /// Exact wire form this rule was decoded from, if any.
    fetched: Option<Map<String, Value>>,
}

impl Rule {
    pub fn new(
        name: impl Into<String>,
        priority: i32,
        statement: Statement,
        visibility_config: VisibilityConfig,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            statement,
            override_action: None,
            visibility_config,
            extra: Map::new(),
            fetched: None,
        }
    }

    pub fn with_override_action(mut self, action: OverrideAction) -> Self {
        self.override_action = Some(action);
        self
    }

    /// True when this rule was decoded from the wire. Until one of its fields
    /// is changed it is written back exactly as it was read; locally built or
    /// modified rules serialize their typed view.
    pub fn is_fetched(&self) -> bool {
        self.fetched.is_some()
    }
}

impl Rule {
    /// True when `wire` still decodes to this rule's typed view, i.e. no field
    /// was changed after the rule was fetched.
    fn decodes_from(&self, wire: &Map<String, Value>) -> bool {
        match serde_json::from_value::<RuleFields>(Value::Object(wire.clone())) {
            Ok(fields) => {
                fields.name == self.name
                    && fields.priority == self.priority
                    && fields.statement == self.statement
                    && fields.override_action == self.override_action
                    && fields.visibility_config == self.visibility_config
                    && fields.extra == self.extra
            }
            Err(_) => false,
        }
    }
}

/// Equality of the typed view. The retained wire form is ignored, so a
/// fetched rule equals a locally built rule with the same decoded content.
impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.priority == other.priority
            && self.statement == other.statement
            && self.override_action == other.override_action
            && self.visibility_config == other.visibility_config
            && self.extra == other.extra
    }
}

#[derive(Serialize)]
struct RuleView<'a> {
    name: &'a str,
    priority: i32,
    statement: &'a Statement,
    #[serde(skip_serializing_if = "Option::is_none")]
    override_action: Option<OverrideAction>,
    visibility_config: &'a VisibilityConfig,
    #[serde(flatten)]
    extra: &'a Map<String, Value>,
}

#[derive(Deserialize)]
struct RuleFields {
    name: String,
    priority: i32,
    statement: Statement,
    #[serde(default)]
    override_action: Option<OverrideAction>,
    visibility_config: VisibilityConfig,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Serialize for Rule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if let Some(wire) = self.fetched.as_ref().filter(|wire| self.decodes_from(wire)) {
            return wire.serialize(serializer);
        }
        RuleView {
            name: &self.name,
            priority: self.priority,
            statement: &self.statement,
            override_action: self.override_action,
            visibility_config: &self.visibility_config,
            extra: &self.extra,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Rule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = Map::<String, Value>::deserialize(deserializer)?;
        let fields: RuleFields = serde_json::from_value(Value::Object(wire.clone()))
            .map_err(serde::de::Error::custom)?;
        Ok(Rule {
            name: fields.name,
            priority: fields.priority,
            statement: fields.statement,
            override_action: fields.override_action,
            visibility_config: fields.visibility_config,
            extra: fields.extra,
            fetched: Some(wire),
        })
    }
}

// ============================================================================
// Statements
// ============================================================================

/// Statement carried by a rule
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Reference to a customer-owned rule group
    RuleGroupReference(RuleGroupReferenceStatement),
    /// Vendor-managed rule group
    ManagedRuleGroup(ManagedRuleGroupStatement),
    /// Any other statement kind, or an owned kind that does not parse strictly
    Opaque(Map<String, Value>),
}

impl Statement {
    /// Wire key of the statement, e.g. `managed_rule_group`.
    pub fn kind(&self) -> String {
        match self {
            Statement::RuleGroupReference(_) => RULE_GROUP_REFERENCE_KEY.to_string(),
            Statement::ManagedRuleGroup(_) => MANAGED_RULE_GROUP_KEY.to_string(),
            Statement::Opaque(block) => block.keys().cloned().collect::<Vec<_>>().join("+"),
        }
    }

    /// Decode a statement block. Never fails: a block that is not exactly one
    /// strictly valid owned statement is kept opaque.
    pub fn from_block(block: Map<String, Value>) -> Self {
        if !is_owned_block(&block) {
            return Statement::Opaque(block);
        }
        match Statement::parse_strict(block.clone()) {
            Ok(statement) => statement,
            Err(_) => Statement::Opaque(block),
        }
    }

    /// Parse a block as exactly one owned statement, rejecting unknown fields.
    pub fn parse_strict(mut block: Map<String, Value>) -> Result<Self, ValidationError> {
        if !is_owned_block(&block) {
            return Err(ValidationError::StatementCount { found: 0 });
        }
        if block.len() != 1 {
            return Err(ValidationError::AmbiguousStatement(
                block.keys().cloned().collect(),
            ));
        }

        if let Some(value) = block.remove(RULE_GROUP_REFERENCE_KEY) {
            return parse_block(RULE_GROUP_REFERENCE_KEY, value).map(Statement::RuleGroupReference);
        }
        match block.remove(MANAGED_RULE_GROUP_KEY) {
            Some(value) => parse_block(MANAGED_RULE_GROUP_KEY, value).map(Statement::ManagedRuleGroup),
            None => Err(ValidationError::StatementCount { found: 0 }),
        }
    }

    /// Why an opaque block that names an owned kind could not be decoded.
    /// `None` for typed statements and for foreign statement kinds.
    pub fn owned_parse_error(&self) -> Option<ValidationError> {
        match self {
            Statement::Opaque(block) if is_owned_block(block) => {
                Statement::parse_strict(block.clone()).err()
            }
            _ => None,
        }
    }

    /// Rule action overrides of owned statement kinds.
    pub fn rule_action_overrides(&self) -> &[RuleActionOverride] {
        match self {
            Statement::RuleGroupReference(s) => &s.rule_action_overrides,
            Statement::ManagedRuleGroup(s) => &s.rule_action_overrides,
            Statement::Opaque(_) => &[],
        }
    }
}

fn is_owned_block(block: &Map<String, Value>) -> bool {
    block.contains_key(RULE_GROUP_REFERENCE_KEY) || block.contains_key(MANAGED_RULE_GROUP_KEY)
}

fn parse_block<T: DeserializeOwned>(kind: &'static str, value: Value) -> Result<T, ValidationError> {
    serde_json::from_value(value).map_err(|e| ValidationError::Malformed {
        kind,
        reason: e.to_string(),
    })
}

impl Serialize for Statement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Statement::RuleGroupReference(statement) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(RULE_GROUP_REFERENCE_KEY, statement)?;
                map.end()
            }
            Statement::ManagedRuleGroup(statement) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(MANAGED_RULE_GROUP_KEY, statement)?;
                map.end()
            }
            Statement::Opaque(block) => block.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Statement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let block = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Statement::from_block(block))
    }
}

/// Reference to a customer-owned rule group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleGroupReferenceStatement {
    pub arn: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_action_overrides: Vec<RuleActionOverride>,
}

/// Vendor-managed rule group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManagedRuleGroupStatement {
    pub vendor_name: String,
    pub name: String,
    /// Omitted means "the vendor's default version".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_action_overrides: Vec<RuleActionOverride>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_rule_group_configs: Vec<ManagedRuleGroupConfig>,
}

// ============================================================================
// Rule action overrides
// ============================================================================

/// Replaces the action of one rule inside the referenced rule group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleActionOverride {
    /// Name of the rule to override
    pub name: String,
    pub action_to_use: RuleAction,
}

/// Action to use in place of the rule's own action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Allow {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_request_handling: Option<CustomRequestHandling>,
    },
    Block {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_response: Option<CustomResponse>,
    },
    Captcha {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_request_handling: Option<CustomRequestHandling>,
    },
    Challenge {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_request_handling: Option<CustomRequestHandling>,
    },
    Count {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_request_handling: Option<CustomRequestHandling>,
    },
}

impl RuleAction {
    pub fn custom_response(&self) -> Option<&CustomResponse> {
        match self {
            RuleAction::Block { custom_response } => custom_response.as_ref(),
            _ => None,
        }
    }
}

/// Headers inserted into the request when it is forwarded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomRequestHandling {
    pub insert_headers: Vec<HeaderEntry>,
}

/// Response sent back instead of forwarding a blocked request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomResponse {
    pub response_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_response_body_key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_headers: Vec<HeaderEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_visibility_default_predicate() {
        let config = VisibilityConfig::default_for("r1");
        assert!(config.is_default_for("r1"));
        assert!(!config.is_default_for("r2"));

        let mut sampled_off = config.clone();
        sampled_off.sampled_requests_enabled = false;
        assert!(!sampled_off.is_default_for("r1"));

        let mut metrics_off = config;
        metrics_off.cloudwatch_metrics_enabled = false;
        assert!(!metrics_off.is_default_for("r1"));
    }

    #[test]
    fn test_scope_and_override_action_parse() {
        assert_eq!("REGIONAL".parse::<Scope>().unwrap(), Scope::Regional);
        assert_eq!("CLOUDFRONT".parse::<Scope>().unwrap(), Scope::Cloudfront);
        assert!("regional".parse::<Scope>().is_err());

        assert_eq!("count".parse::<OverrideAction>().unwrap(), OverrideAction::Count);
        assert_eq!(
            "block".parse::<OverrideAction>().unwrap_err(),
            ValidationError::InvalidOverrideAction("block".to_string())
        );
    }

    #[test]
    fn test_sibling_rule_with_foreign_statement_is_kept_verbatim() {
        let value = json!({
            "name": "rate-limit",
            "priority": 4,
            "statement": {"rate_based_statement": {"limit": 2000, "aggregate_key_type": "IP"}},
            "action": {"block": {}},
            "visibility_config": {
                "sampled_requests_enabled": false,
                "cloudwatch_metrics_enabled": true,
                "metric_name": "rate"
            },
            "rule_labels": [{"name": "throttled"}]
        });

        let rule: Rule = serde_json::from_value(value.clone()).unwrap();
        assert!(matches!(rule.statement, Statement::Opaque(_)));
        assert_eq!(rule.statement.kind(), "rate_based_statement");
        assert!(rule.extra.contains_key("action"));
        assert!(rule.extra.contains_key("rule_labels"));

        assert_eq!(serde_json::to_value(&rule).unwrap(), value);
    }

    #[test]
    fn test_owned_statement_parses_strictly() {
        let typo = json!({"rule_group_reference": {"arn": "arn:aws:wafv2:us-east-1:1:regional/rulegroup/g/1", "rule_action_override": []}});
        let block = typo.as_object().unwrap().clone();
        let err = Statement::parse_strict(block.clone()).unwrap_err();
        assert!(err.to_string().contains("rule_group_reference"));

        // Decoding keeps the block instead of failing, and remembers why.
        let statement: Statement = serde_json::from_value(typo).unwrap();
        assert_eq!(statement, Statement::Opaque(block));
        assert_eq!(statement.owned_parse_error(), Some(err));

        let mixed = json!({
            "rule_group_reference": {"arn": "arn:aws:wafv2:us-east-1:1:regional/rulegroup/g/1"},
            "managed_rule_group": {"vendor_name": "AWS", "name": "AWSManagedRulesCommonRuleSet"}
        });
        let err = Statement::parse_strict(mixed.as_object().unwrap().clone()).unwrap_err();
        assert!(matches!(err, ValidationError::AmbiguousStatement(_)));
        assert!(matches!(
            Statement::from_block(mixed.as_object().unwrap().clone()),
            Statement::Opaque(_)
        ));
    }

    #[test]
    fn test_owned_kind_sibling_round_trips_exactly() {
        // Explicit empty lists, omitted defaults and an unmodelled
        // scope-down statement must all survive decode and re-encode.
        let value = json!({
            "name": "bot-control",
            "priority": 2,
            "statement": {
                "managed_rule_group": {
                    "vendor_name": "AWS",
                    "name": "AWSManagedRulesBotControlRuleSet",
                    "rule_action_overrides": [],
                    "managed_rule_group_configs": [
                        {"aws_managed_rules_bot_control_rule_set": {"inspection_level": "COMMON"}}
                    ],
                    "scope_down_statement": {"byte_match_statement": {"search_string": "/api"}}
                }
            },
            "override_action": "none",
            "visibility_config": {
                "sampled_requests_enabled": true,
                "cloudwatch_metrics_enabled": true,
                "metric_name": "bot-control"
            }
        });

        let rule: Rule = serde_json::from_value(value.clone()).unwrap();
        assert!(rule.is_fetched());
        assert!(matches!(rule.statement, Statement::Opaque(_)));
        assert!(matches!(
            rule.statement.owned_parse_error(),
            Some(ValidationError::Malformed { kind: MANAGED_RULE_GROUP_KEY, .. })
        ));
        assert_eq!(serde_json::to_value(&rule).unwrap(), value);

        let mut parseable = value.clone();
        parseable["statement"]["managed_rule_group"]
            .as_object_mut()
            .unwrap()
            .remove("scope_down_statement");
        let rule: Rule = serde_json::from_value(parseable.clone()).unwrap();
        assert!(matches!(rule.statement, Statement::ManagedRuleGroup(_)));
        assert_eq!(serde_json::to_value(&rule).unwrap(), parseable);
    }

    #[test]
    fn test_equality_ignores_wire_form() {
        let built = Rule::new(
            "bots",
            1,
            Statement::RuleGroupReference(RuleGroupReferenceStatement {
                arn: "arn:aws:wafv2:us-east-1:1:regional/rulegroup/bots/1".to_string(),
                rule_action_overrides: vec![],
            }),
            VisibilityConfig::default_for("bots"),
        );
        let mut wire = serde_json::to_value(&built).unwrap();
        wire["statement"]["rule_group_reference"]["rule_action_overrides"] = json!([]);

        let fetched: Rule = serde_json::from_value(wire.clone()).unwrap();
        assert!(!built.is_fetched());
        assert_eq!(fetched, built);
        assert_eq!(serde_json::to_value(&fetched).unwrap(), wire);
    }

    #[test]
    fn test_modified_fetched_rule_writes_typed_view() {
        let wire = json!({
            "name": "bots",
            "priority": 1,
            "statement": {"rule_group_reference": {
                "arn": "arn:aws:wafv2:us-east-1:1:regional/rulegroup/bots/1",
                "rule_action_overrides": []
            }},
            "visibility_config": {
                "sampled_requests_enabled": true,
                "cloudwatch_metrics_enabled": true,
                "metric_name": "bots"
            }
        });
        let mut rule: Rule = serde_json::from_value(wire).unwrap();
        rule.priority = 7;

        let written = serde_json::to_value(&rule).unwrap();
        assert_eq!(written["priority"], json!(7));
        assert!(written["statement"]["rule_group_reference"]
            .get("rule_action_overrides")
            .is_none());
    }

    #[test]
    fn test_managed_statement_wire_shape() {
        let statement = Statement::ManagedRuleGroup(ManagedRuleGroupStatement {
            vendor_name: "AWS".to_string(),
            name: "AWSManagedRulesCommonRuleSet".to_string(),
            version: None,
            rule_action_overrides: vec![RuleActionOverride {
                name: "SizeRestrictions_BODY".to_string(),
                action_to_use: RuleAction::Count {
                    custom_request_handling: None,
                },
            }],
            managed_rule_group_configs: vec![],
        });

        assert_eq!(
            serde_json::to_value(&statement).unwrap(),
            json!({
                "managed_rule_group": {
                    "vendor_name": "AWS",
                    "name": "AWSManagedRulesCommonRuleSet",
                    "rule_action_overrides": [
                        {"name": "SizeRestrictions_BODY", "action_to_use": {"count": {}}}
                    ]
                }
            })
        );
    }
}
