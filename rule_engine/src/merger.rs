// Rule list merging and the defaulting policy
//
// Merges never mutate the fetched list. Each operation returns a fresh vector
// in which every rule other than the touched one is a clone of the original,
// in the original order, including fields this crate does not model.

use thiserror::Error;

use crate::desired::{DesiredRule, RuleStatementSpec};
use crate::rule::{Rule, VisibilityConfig};
use crate::validation::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("Rule index {index} out of range for rule list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

pub struct RuleMerger;

impl RuleMerger {
    /// Append `rule`.
    pub fn insert(rules: &[Rule], rule: Rule) -> Vec<Rule> {
        let mut merged = Vec::with_capacity(rules.len() + 1);
        merged.extend_from_slice(rules);
        merged.push(rule);
        merged
    }

    /// Replace the rule at `index`.
    pub fn replace(rules: &[Rule], index: usize, rule: Rule) -> Result<Vec<Rule>, MergeError> {
        if index >= rules.len() {
            return Err(MergeError::IndexOutOfRange {
                index,
                len: rules.len(),
            });
        }
        let mut merged = rules.to_vec();
        merged[index] = rule;
        Ok(merged)
    }

    /// Drop the rule at `index`.
    pub fn remove(rules: &[Rule], index: usize) -> Result<Vec<Rule>, MergeError> {
        if index >= rules.len() {
            return Err(MergeError::IndexOutOfRange {
                index,
                len: rules.len(),
            });
        }
        Ok(rules
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, rule)| rule.clone())
            .collect())
    }

    /// Build the rule to submit, applying defaults for omitted fields.
    pub fn materialize(desired: &DesiredRule) -> Result<Rule, ValidationError> {
        let statement = desired.validate()?;
        let visibility_config = desired
            .visibility_config
            .clone()
            .unwrap_or_else(|| VisibilityConfig::default_for(&desired.name));

        Ok(Rule::new(desired.name.clone(), desired.priority, statement, visibility_config)
            .with_override_action(desired.override_action))
    }

    /// Inverse of `materialize` used on read. A visibility config equal to the
    /// generated default is reported as absent so the desired state does not
    /// drift. Returns `None` for rules with an opaque statement.
    pub fn project(rule: &Rule) -> Option<DesiredRule> {
        let statement = RuleStatementSpec::from_statement(&rule.statement)?;
        let visibility_config = if rule.visibility_config.is_default_for(&rule.name) {
            None
        } else {
            Some(rule.visibility_config.clone())
        };

        Some(DesiredRule {
            name: rule.name.clone(),
            priority: rule.priority,
            statement,
            override_action: rule.override_action.unwrap_or_default(),
            visibility_config,
        })
    }
}
