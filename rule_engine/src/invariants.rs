// Uniqueness invariants of a rule list
//
// Every rule in a web ACL has a unique name and a unique priority. These are
// checked locally before submission so the caller gets an error naming the
// conflicting rule instead of an opaque remote rejection. Priority is checked
// before name for each existing rule.

use thiserror::Error;

use crate::rule::Rule;

/// Invariant violation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantError {
    #[error("Rule with priority {priority} already exists in Web ACL (rule {existing:?})")]
    DuplicatePriority { priority: i32, existing: String },

    #[error("Rule with name {name} already exists in Web ACL")]
    DuplicateName { name: String },
}

pub struct InvariantChecker;

impl InvariantChecker {
    /// Check that `new_rule` can be appended to `rules`.
    pub fn check_insert(rules: &[Rule], new_rule: &Rule) -> Result<(), InvariantError> {
        Self::check(rules.iter(), new_rule)
    }

    /// Check that the rule at `self_index` can be replaced by `updated`.
    pub fn check_update(
        rules: &[Rule],
        self_index: usize,
        updated: &Rule,
    ) -> Result<(), InvariantError> {
        Self::check(
            rules
                .iter()
                .enumerate()
                .filter(|(index, _)| *index != self_index)
                .map(|(_, rule)| rule),
            updated,
        )
    }

    fn check<'a>(
        others: impl Iterator<Item = &'a Rule>,
        candidate: &Rule,
    ) -> Result<(), InvariantError> {
        for existing in others {
            if existing.priority == candidate.priority {
                return Err(InvariantError::DuplicatePriority {
                    priority: candidate.priority,
                    existing: existing.name.clone(),
                });
            }
            if existing.name == candidate.name {
                return Err(InvariantError::DuplicateName {
                    name: candidate.name.clone(),
                });
            }
        }
        Ok(())
    }
}
