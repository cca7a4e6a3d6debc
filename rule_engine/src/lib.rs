pub mod validation;
pub mod rule;
pub mod managed_config;
pub mod descriptor;
pub mod identity;
pub mod desired;
pub mod matcher;
pub mod invariants;
pub mod merger;

pub use validation::{ValidationError, MAX_NAME_LEN, MAX_VERSION_LEN};

pub use rule::{
    Container,              // Fetched web ACL with its rule list
    ContainerKey,           // (id, name, scope) identity
    CustomRequestHandling,  // Inserted request headers
    CustomResponse,         // Block response override
    HeaderEntry,            // Header name/value pair
    ManagedRuleGroupStatement,
    OverrideAction,         // none | count
    Rule,                   // One entry of a rule list
    RuleAction,             // Action used by an override
    RuleActionOverride,     // Per-rule action override
    RuleGroupReferenceStatement,
    Scope,                  // REGIONAL | CLOUDFRONT
    Statement,              // Owned statement kinds plus opaque siblings
    VersionToken,           // Optimistic concurrency token
    VisibilityConfig,       // Telemetry settings and their default
};

// Re-export the managed configuration union
pub use managed_config::{
    AcfpRequestInspection, AcfpRuleSet, AntiDdosRuleSet, AtpRuleSet, BotControlRuleSet,
    ClientSideAction, ClientSideActionConfig, FieldIdentifier, FieldIdentifiers,
    InspectionLevel, ManagedRuleGroupConfig, PayloadType, RequestInspection,
    ResponseInspection, SensitivityLevel, UsageOfAction,
};

pub use descriptor::{RuleDescriptor, RuleGroupKey, RuleKind};
pub use identity::{parse_container_arn, RuleIdentity};
pub use desired::{DesiredRule, RuleStatementSpec};

pub use matcher::{MatchOutcome, RuleMatcher};
pub use invariants::{InvariantChecker, InvariantError};
pub use merger::{MergeError, RuleMerger};
