// Locating an owned rule inside a fetched rule list

use crate::descriptor::RuleDescriptor;
use crate::rule::Rule;

/// Result of looking up a descriptor in a rule list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Name and key match the rule at this index.
    Found(usize),
    /// No rule carries the name.
    Absent,
    /// A rule with the name exists but references a different rule group.
    NameCollision(usize),
}

pub struct RuleMatcher;

impl RuleMatcher {
    /// Filter by exact name, then confirm statement discriminant and key.
    ///
    /// A name match with a different key belongs to an unrelated rule and is
    /// reported, never repaired.
    pub fn find(rules: &[Rule], descriptor: &RuleDescriptor) -> MatchOutcome {
        let mut collision = None;
        for (index, rule) in rules.iter().enumerate() {
            if rule.name != descriptor.name {
                continue;
            }
            if descriptor.key.matches(&rule.statement) {
                return MatchOutcome::Found(index);
            }
            collision.get_or_insert(index);
        }

        match collision {
            Some(index) => MatchOutcome::NameCollision(index),
            None => MatchOutcome::Absent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::RuleGroupKey;
    use crate::rule::{
        ManagedRuleGroupStatement, RuleGroupReferenceStatement, Statement, VisibilityConfig,
    };
    use serde_json::Map;

    fn rule(name: &str, priority: i32, statement: Statement) -> Rule {
        Rule::new(name, priority, statement, VisibilityConfig::default_for(name))
    }

    fn managed(version: Option<&str>) -> Statement {
        Statement::ManagedRuleGroup(ManagedRuleGroupStatement {
            vendor_name: "AWS".to_string(),
            name: "AWSManagedRulesCommonRuleSet".to_string(),
            version: version.map(str::to_string),
            rule_action_overrides: vec![],
            managed_rule_group_configs: vec![],
        })
    }

    #[test]
    fn test_find_by_name_and_key() {
        let rules = vec![
            rule(
                "bots",
                1,
                Statement::RuleGroupReference(RuleGroupReferenceStatement {
                    arn: "arn:aws:wafv2:us-east-1:1:regional/rulegroup/bots/1".to_string(),
                    rule_action_overrides: vec![],
                }),
            ),
            rule("common", 2, managed(None)),
        ];

        let descriptor = RuleDescriptor::new(
            "common",
            RuleGroupKey::managed("AWS", "AWSManagedRulesCommonRuleSet", None),
        );
        assert_eq!(RuleMatcher::find(&rules, &descriptor), MatchOutcome::Found(1));

        let missing = RuleDescriptor::new(
            "other",
            RuleGroupKey::managed("AWS", "AWSManagedRulesCommonRuleSet", None),
        );
        assert_eq!(RuleMatcher::find(&rules, &missing), MatchOutcome::Absent);
        assert_eq!(RuleMatcher::find(&[], &missing), MatchOutcome::Absent);
    }

    #[test]
    fn test_version_mismatch_is_collision() {
        let rules = vec![rule("common", 2, managed(Some("1.0")))];
        let descriptor = RuleDescriptor::new(
            "common",
            RuleGroupKey::managed("AWS", "AWSManagedRulesCommonRuleSet", None),
        );
        assert_eq!(
            RuleMatcher::find(&rules, &descriptor),
            MatchOutcome::NameCollision(0)
        );
    }

    #[test]
    fn test_opaque_rule_with_same_name_is_collision() {
        let mut block = Map::new();
        block.insert("byte_match_statement".to_string(), serde_json::json!({}));
        let rules = vec![rule("common", 2, Statement::Opaque(block))];
        let descriptor = RuleDescriptor::new(
            "common",
            RuleGroupKey::managed("AWS", "AWSManagedRulesCommonRuleSet", None),
        );
        assert_eq!(
            RuleMatcher::find(&rules, &descriptor),
            MatchOutcome::NameCollision(0)
        );
    }

    #[test]
    fn test_owned_block_with_unmodelled_fields_is_found() {
        let statement: Statement = serde_json::from_value(serde_json::json!({
            "managed_rule_group": {
                "vendor_name": "AWS",
                "name": "AWSManagedRulesCommonRuleSet",
                "scope_down_statement": {"byte_match_statement": {}}
            }
        }))
        .unwrap();
        assert!(matches!(statement, Statement::Opaque(_)));

        let rules = vec![rule("common", 2, statement)];
        let descriptor = RuleDescriptor::new(
            "common",
            RuleGroupKey::managed("AWS", "AWSManagedRulesCommonRuleSet", None),
        );
        assert_eq!(RuleMatcher::find(&rules, &descriptor), MatchOutcome::Found(0));
    }
}
