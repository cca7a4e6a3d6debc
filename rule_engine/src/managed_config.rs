// Managed rule group configuration
//
// Some vendor-managed rule groups take extra configuration: login paths for
// account-takeover prevention, registration paths for account-creation fraud
// prevention, the inspection level for bot control, the challenge policy for
// anti-DDoS. On the wire each entry of `managed_rule_group_configs` is a block
// with exactly one populated key naming the variant.
//
// The variant set is closed. `expand` matches every known key and fails on
// anything else instead of silently dropping it, so a block that cannot be
// represented never makes it into a submitted rule list.

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::validation::{check_length, ValidationError};

pub const ACFP_RULE_SET_KEY: &str = "aws_managed_rules_acfp_rule_set";
pub const ATP_RULE_SET_KEY: &str = "aws_managed_rules_atp_rule_set";
pub const ANTI_DDOS_RULE_SET_KEY: &str = "aws_managed_rules_anti_ddos_rule_set";
pub const BOT_CONTROL_RULE_SET_KEY: &str = "aws_managed_rules_bot_control_rule_set";

const MAX_PATH_LEN: usize = 256;
const MAX_FIELD_IDENTIFIER_LEN: usize = 512;

// ============================================================================
// Union
// ============================================================================

/// One managed rule group configuration block
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedRuleGroupConfig {
    AccountCreationFraudPrevention(AcfpRuleSet),
    AccountTakeoverPrevention(AtpRuleSet),
    AntiDdos(AntiDdosRuleSet),
    BotControl(BotControlRuleSet),
}

impl ManagedRuleGroupConfig {
    /// Wire key of this variant.
    pub fn variant_key(&self) -> &'static str {
        match self {
            ManagedRuleGroupConfig::AccountCreationFraudPrevention(_) => ACFP_RULE_SET_KEY,
            ManagedRuleGroupConfig::AccountTakeoverPrevention(_) => ATP_RULE_SET_KEY,
            ManagedRuleGroupConfig::AntiDdos(_) => ANTI_DDOS_RULE_SET_KEY,
            ManagedRuleGroupConfig::BotControl(_) => BOT_CONTROL_RULE_SET_KEY,
        }
    }

    /// Build a variant from a wire block holding exactly one known key.
    pub fn expand(block: Map<String, Value>) -> Result<Self, ValidationError> {
        if block.len() != 1 {
            return Err(ValidationError::ConfigVariantCount(block.len()));
        }
        let Some((key, value)) = block.into_iter().next() else {
            return Err(ValidationError::ConfigVariantCount(0));
        };

        match key.as_str() {
            ACFP_RULE_SET_KEY => parse_variant(ACFP_RULE_SET_KEY, value)
                .map(ManagedRuleGroupConfig::AccountCreationFraudPrevention),
            ATP_RULE_SET_KEY => parse_variant(ATP_RULE_SET_KEY, value)
                .map(ManagedRuleGroupConfig::AccountTakeoverPrevention),
            ANTI_DDOS_RULE_SET_KEY => {
                parse_variant(ANTI_DDOS_RULE_SET_KEY, value).map(ManagedRuleGroupConfig::AntiDdos)
            }
            BOT_CONTROL_RULE_SET_KEY => parse_variant(BOT_CONTROL_RULE_SET_KEY, value)
                .map(ManagedRuleGroupConfig::BotControl),
            _ => Err(ValidationError::UnknownConfigVariant(key)),
        }
    }

    /// Inverse of `expand`.
    pub fn flatten(&self) -> Result<Map<String, Value>, ValidationError> {
        let value = match self {
            ManagedRuleGroupConfig::AccountCreationFraudPrevention(c) => serde_json::to_value(c),
            ManagedRuleGroupConfig::AccountTakeoverPrevention(c) => serde_json::to_value(c),
            ManagedRuleGroupConfig::AntiDdos(c) => serde_json::to_value(c),
            ManagedRuleGroupConfig::BotControl(c) => serde_json::to_value(c),
        }
        .map_err(|e| ValidationError::Malformed {
            kind: self.variant_key(),
            reason: e.to_string(),
        })?;

        let mut block = Map::new();
        block.insert(self.variant_key().to_string(), value);
        Ok(block)
    }

    /// Field-level checks serde cannot express.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            ManagedRuleGroupConfig::AccountCreationFraudPrevention(c) => {
                check_path("creation_path", &c.creation_path)?;
                check_path("registration_page_path", &c.registration_page_path)?;
                c.request_inspection.validate()?;
                if let Some(inspection) = &c.response_inspection {
                    inspection.validate()?;
                }
            }
            ManagedRuleGroupConfig::AccountTakeoverPrevention(c) => {
                check_path("login_path", &c.login_path)?;
                if let Some(inspection) = &c.request_inspection {
                    inspection.validate()?;
                }
                if let Some(inspection) = &c.response_inspection {
                    inspection.validate()?;
                }
            }
            ManagedRuleGroupConfig::AntiDdos(c) => {
                for pattern in &c.client_side_action_config.challenge.exempt_uri_regular_expressions {
                    check_length("exempt_uri_regular_expression", pattern, 1, MAX_PATH_LEN)?;
                }
            }
            ManagedRuleGroupConfig::BotControl(_) => {}
        }
        Ok(())
    }
}

fn parse_variant<T: serde::de::DeserializeOwned>(
    kind: &'static str,
    value: Value,
) -> Result<T, ValidationError> {
    serde_json::from_value(value).map_err(|e| ValidationError::Malformed {
        kind,
        reason: e.to_string(),
    })
}

/// Paths must be 1..=256 characters and not entirely whitespace.
fn check_path(field: &'static str, value: &str) -> Result<(), ValidationError> {
    check_length(field, value, 1, MAX_PATH_LEN)?;
    if value.trim().is_empty() {
        return Err(ValidationError::Malformed {
            kind: field,
            reason: "must contain a non-whitespace character".to_string(),
        });
    }
    Ok(())
}

impl Serialize for ManagedRuleGroupConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let block = self.flatten().map_err(serde::ser::Error::custom)?;
        let mut map = serializer.serialize_map(Some(block.len()))?;
        for (key, value) in &block {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ManagedRuleGroupConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let block = Map::<String, Value>::deserialize(deserializer)?;
        ManagedRuleGroupConfig::expand(block).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Account creation / takeover prevention
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayloadType {
    Json,
    FormEncoded,
}

/// Where a request field lives: a JSON pointer or a form field name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldIdentifier {
    pub identifier: String,
}

impl FieldIdentifier {
    fn validate(&self, field: &'static str) -> Result<(), ValidationError> {
        check_length(field, &self.identifier, 1, MAX_FIELD_IDENTIFIER_LEN)?;
        if self.identifier.trim().is_empty() {
            return Err(ValidationError::Malformed {
                kind: field,
                reason: "must contain a non-whitespace character".to_string(),
            });
        }
        Ok(())
    }
}

/// List of field identifiers (addresses, phone numbers)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldIdentifiers {
    pub identifiers: Vec<String>,
}

impl FieldIdentifiers {
    fn validate(&self, field: &'static str) -> Result<(), ValidationError> {
        if self.identifiers.is_empty() {
            return Err(ValidationError::Malformed {
                kind: field,
                reason: "at least one identifier is required".to_string(),
            });
        }
        Ok(())
    }
}

/// Login request inspection for account takeover prevention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestInspection {
    pub payload_type: PayloadType,
    pub username_field: FieldIdentifier,
    pub password_field: FieldIdentifier,
}

impl RequestInspection {
    fn validate(&self) -> Result<(), ValidationError> {
        self.username_field.validate("username_field")?;
        self.password_field.validate("password_field")
    }
}

/// Registration request inspection for account creation fraud prevention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AcfpRequestInspection {
    pub payload_type: PayloadType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_field: Option<FieldIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_field: Option<FieldIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_field: Option<FieldIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_fields: Option<FieldIdentifiers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number_fields: Option<FieldIdentifiers>,
}

impl AcfpRequestInspection {
    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(field) = &self.username_field {
            field.validate("username_field")?;
        }
        if let Some(field) = &self.password_field {
            field.validate("password_field")?;
        }
        if let Some(field) = &self.email_field {
            field.validate("email_field")?;
        }
        if let Some(fields) = &self.address_fields {
            fields.validate("address_fields")?;
        }
        if let Some(fields) = &self.phone_number_fields {
            fields.validate("phone_number_fields")?;
        }
        Ok(())
    }
}

/// How the origin's response tells a successful login or registration apart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseInspection {
    StatusCode {
        success_codes: Vec<u16>,
        failure_codes: Vec<u16>,
    },
    Header {
        name: String,
        success_values: Vec<String>,
        failure_values: Vec<String>,
    },
    BodyContains {
        success_strings: Vec<String>,
        failure_strings: Vec<String>,
    },
    Json {
        identifier: String,
        success_values: Vec<String>,
        failure_values: Vec<String>,
    },
}

impl ResponseInspection {
    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            ResponseInspection::Header { name, .. } => {
                check_length("response_inspection.header.name", name, 1, MAX_PATH_LEN)
            }
            ResponseInspection::Json { identifier, .. } => {
                check_length("response_inspection.json.identifier", identifier, 1, MAX_PATH_LEN)
            }
            ResponseInspection::StatusCode { .. } | ResponseInspection::BodyContains { .. } => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AcfpRuleSet {
    pub creation_path: String,
    pub registration_page_path: String,
    #[serde(default)]
    pub enable_regex_in_path: bool,
    pub request_inspection: AcfpRequestInspection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_inspection: Option<ResponseInspection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AtpRuleSet {
    pub login_path: String,
    #[serde(default)]
    pub enable_regex_in_path: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_inspection: Option<RequestInspection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_inspection: Option<ResponseInspection>,
}

// ============================================================================
// Anti-DDoS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsageOfAction {
    #[default]
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensitivityLevel {
    Low,
    Medium,
    #[default]
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSideAction {
    pub usage_of_action: UsageOfAction,
    #[serde(default)]
    pub sensitivity: SensitivityLevel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exempt_uri_regular_expressions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSideActionConfig {
    pub challenge: ClientSideAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AntiDdosRuleSet {
    pub client_side_action_config: ClientSideActionConfig,
    #[serde(default)]
    pub sensitivity_to_block: SensitivityLevel,
}

// ============================================================================
// Bot control
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InspectionLevel {
    Common,
    Targeted,
}

fn default_enable_machine_learning() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BotControlRuleSet {
    pub inspection_level: InspectionLevel,
    #[serde(default = "default_enable_machine_learning")]
    pub enable_machine_learning: bool,
}
