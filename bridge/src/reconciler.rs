//! Per-rule create/read/update/delete on top of whole-container replace.
//!
//! Every operation fetches the container fresh; nothing is cached between
//! calls. Writes go through [`ConflictRetryDriver`] so a concurrent writer on
//! the same web ACL only costs a re-fetch and re-merge. The target rule is
//! always re-located by descriptor, since its index may shift between
//! attempts.
//!
//! A rule whose name matches but whose rule group differs belongs to someone
//! else. Read and Update report it as `DuplicateName`; Delete leaves it alone.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use rule_engine::{
    DesiredRule, InvariantChecker, InvariantError, MatchOutcome, Rule, RuleDescriptor,
    RuleIdentity, RuleMatcher, RuleMerger, ValidationError,
};

use crate::config::ReconcilerConfig;
use crate::error::{ReconcileError, RepositoryError};
use crate::repository::ContainerRepository;
use crate::retry::{ConflictRetryDriver, MergePlan, SubmitReport};

/// Local record of one owned rule after a successful operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleState {
    pub identity: RuleIdentity,
    /// Desired payload as planned, or as projected back on read.
    pub rule: DesiredRule,
    pub synced_at: DateTime<Utc>,
}

impl RuleState {
    fn new(identity: RuleIdentity, rule: DesiredRule) -> Self {
        Self {
            identity,
            rule,
            synced_at: Utc::now(),
        }
    }

    pub fn resource_id(&self) -> String {
        self.identity.resource_id()
    }
}

/// Owns single rules inside shared web ACLs.
pub struct Reconciler<R: ContainerRepository + ?Sized> {
    repository: Arc<R>,
    config: ReconcilerConfig,
    cancel: CancellationToken,
}

impl<R: ContainerRepository + ?Sized> Clone for Reconciler<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            config: self.config.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<R: ContainerRepository + ?Sized> Reconciler<R> {
    pub fn new(repository: Arc<R>, config: ReconcilerConfig) -> Self {
        Self {
            repository,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Abandon retries of in-progress and future operations once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    fn driver(&self, timeout: Duration) -> ConflictRetryDriver<'_, R> {
        ConflictRetryDriver::new(&*self.repository, self.config.backoff.clone(), timeout)
            .with_cancellation(self.cancel.clone())
    }

    /// Insert a new rule into the web ACL at `container_arn`.
    pub async fn create(
        &self,
        container_arn: &str,
        desired: DesiredRule,
    ) -> Result<RuleState, ReconcileError> {
        let op = Uuid::new_v4();
        let rule = RuleMerger::materialize(&desired)?;
        let identity = RuleIdentity::new(container_arn, desired.descriptor()?)?;
        info!(
            "[{}] Creating rule {} in {}",
            op, identity.descriptor, identity.container
        );

        let report = self
            .driver(self.config.create_timeout())
            .run(&identity.container, |container| {
                InvariantChecker::check_insert(&container.rules, &rule)?;
                Ok(MergePlan::Submit(RuleMerger::insert(
                    &container.rules,
                    rule.clone(),
                )))
            })
            .await
            .map_err(|e| log_failure(op, "create", e))?;

        log_success(op, "create", &identity, &report);
        Ok(RuleState::new(identity, desired))
    }

    /// Fetch the current state of an owned rule. `None` when the rule or its
    /// web ACL no longer exists.
    pub async fn read(&self, identity: &RuleIdentity) -> Result<Option<RuleState>, ReconcileError> {
        let op = Uuid::new_v4();
        debug!("[{}] Reading rule {}", op, identity);

        let container = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(ReconcileError::Cancelled { attempts: 0 });
            }
            fetched = self.repository.fetch(&identity.container) => fetched,
        };
        let container = match container {
            Ok(container) => container,
            Err(RepositoryError::NotFound(_)) => {
                warn!(
                    "[{}] Web ACL {} not found, rule {} is gone",
                    op, identity.container, identity.descriptor.name
                );
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match RuleMatcher::find(&container.rules, &identity.descriptor) {
            MatchOutcome::Found(index) => {
                let current = &container.rules[index];
                check_owned_statement(current)?;
                let projected = RuleMerger::project(current).ok_or(
                    ReconcileError::Validation(ValidationError::StatementCount { found: 0 }),
                )?;
                Ok(Some(RuleState::new(identity.clone(), projected)))
            }
            MatchOutcome::Absent => {
                warn!(
                    "[{}] Rule {} not found in {}",
                    op, identity.descriptor.name, identity.container
                );
                Ok(None)
            }
            MatchOutcome::NameCollision(index) => Err(name_collision(
                op,
                &identity.descriptor,
                &container.rules[index],
            )),
        }
    }

    /// Update an owned rule in place. Name and rule group are immutable.
    pub async fn update(
        &self,
        state: &RuleState,
        desired: DesiredRule,
    ) -> Result<RuleState, ReconcileError> {
        let op = Uuid::new_v4();
        let descriptor = desired.descriptor()?;
        check_immutable(&state.identity.descriptor, &descriptor)?;
        let rule = RuleMerger::materialize(&desired)?;
        let identity = state.identity.clone();
        info!(
            "[{}] Updating rule {} in {}",
            op, identity.descriptor, identity.container
        );

        let report = self
            .driver(self.config.update_timeout())
            .run(&identity.container, |container| {
                match RuleMatcher::find(&container.rules, &identity.descriptor) {
                    MatchOutcome::Found(index) => {
                        let current = &container.rules[index];
                        check_owned_statement(current)?;
                        let mut updated = rule.clone();
                        updated.extra = current.extra.clone();
                        if *current == updated {
                            return Ok(MergePlan::Unchanged);
                        }
                        InvariantChecker::check_update(&container.rules, index, &updated)?;
                        Ok(MergePlan::Submit(RuleMerger::replace(
                            &container.rules,
                            index,
                            updated,
                        )?))
                    }
                    MatchOutcome::Absent => Err(ReconcileError::RuleNotFound {
                        rule: identity.descriptor.name.clone(),
                        container: identity.container.to_string(),
                    }),
                    MatchOutcome::NameCollision(index) => Err(name_collision(
                        op,
                        &identity.descriptor,
                        &container.rules[index],
                    )),
                }
            })
            .await
            .map_err(|e| log_failure(op, "update", e))?;

        log_success(op, "update", &identity, &report);
        Ok(RuleState::new(identity, desired))
    }

    /// Remove an owned rule. Missing rules and missing web ACLs count as deleted.
    pub async fn delete(&self, state: &RuleState) -> Result<(), ReconcileError> {
        let op = Uuid::new_v4();
        let identity = &state.identity;
        info!(
            "[{}] Deleting rule {} from {}",
            op, identity.descriptor, identity.container
        );

        let result = self
            .driver(self.config.delete_timeout())
            .run(&identity.container, |container| {
                match RuleMatcher::find(&container.rules, &identity.descriptor) {
                    MatchOutcome::Found(index) => Ok(MergePlan::Submit(RuleMerger::remove(
                        &container.rules,
                        index,
                    )?)),
                    MatchOutcome::Absent | MatchOutcome::NameCollision(_) => {
                        Ok(MergePlan::Unchanged)
                    }
                }
            })
            .await;

        match result {
            Ok(report) => {
                log_success(op, "delete", identity, &report);
                Ok(())
            }
            Err(ReconcileError::Repository(RepositoryError::NotFound(_))) => {
                info!("[{}] Web ACL {} already gone", op, identity.container);
                Ok(())
            }
            Err(e) => Err(log_failure(op, "delete", e)),
        }
    }

    /// Parse an import id into an identity. No remote call is made; follow up
    /// with [`Reconciler::read`] to populate the state.
    pub fn import(&self, id: &str) -> Result<RuleIdentity, ReconcileError> {
        let identity = RuleIdentity::parse_import_id(id)?;
        info!("Importing rule {} as {}", identity.descriptor, identity);
        Ok(identity)
    }
}

fn check_immutable(current: &RuleDescriptor, desired: &RuleDescriptor) -> Result<(), ValidationError> {
    if current.name != desired.name {
        return Err(ValidationError::RequiresReplacement {
            field: "name",
            from: current.name.clone(),
            to: desired.name.clone(),
        });
    }
    if current.kind() != desired.kind() {
        return Err(ValidationError::RequiresReplacement {
            field: "rule_group_type",
            from: current.kind().to_string(),
            to: desired.kind().to_string(),
        });
    }
    if current.key != desired.key {
        return Err(ValidationError::RequiresReplacement {
            field: "rule_group_identifier",
            from: current.key.identifier(),
            to: desired.key.identifier(),
        });
    }
    Ok(())
}

/// The located rule must decode strictly before it is read or rewritten.
fn check_owned_statement(rule: &Rule) -> Result<(), ValidationError> {
    match rule.statement.owned_parse_error() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn name_collision(op: Uuid, descriptor: &RuleDescriptor, existing: &Rule) -> ReconcileError {
    warn!(
        "[{}] Rule name {} is taken by a {} rule this reconciler does not own",
        op,
        descriptor.name,
        existing.statement.kind()
    );
    ReconcileError::Invariant(InvariantError::DuplicateName {
        name: descriptor.name.clone(),
    })
}

fn log_success(op: Uuid, action: &str, identity: &RuleIdentity, report: &SubmitReport) {
    match &report.version_token {
        Some(token) => info!(
            "[{}] {} of {} done after {} attempt(s), version {}",
            op, action, identity, report.attempts, token
        ),
        None => info!("[{}] {} of {}: nothing to change", op, action, identity),
    }
}

fn log_failure(op: Uuid, action: &str, error: ReconcileError) -> ReconcileError {
    warn!("[{}] {} failed: {}", op, action, error);
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRepository;
    use rule_engine::{
        ManagedRuleGroupStatement, OverrideAction, RuleGroupKey, RuleGroupReferenceStatement,
        RuleStatementSpec,
    };

    const ACL_ARN: &str = "arn:aws:wafv2:us-east-1:123456789012:regional/webacl/shop-acl/a1";
    const GROUP_ARN: &str = "arn:aws:wafv2:us-east-1:123456789012:regional/rulegroup/bots/b1";

    fn setup() -> Reconciler<InMemoryRepository> {
        let repo = Arc::new(InMemoryRepository::new());
        let key = rule_engine::parse_container_arn(ACL_ARN).unwrap();
        repo.put_container(key, Some(ACL_ARN.to_string()), vec![]);
        Reconciler::new(repo, ReconcilerConfig::default())
    }

    fn custom(name: &str, priority: i32) -> DesiredRule {
        DesiredRule::new(
            name,
            priority,
            RuleStatementSpec::custom(RuleGroupReferenceStatement {
                arn: GROUP_ARN.to_string(),
                rule_action_overrides: vec![],
            }),
        )
    }

    #[tokio::test]
    async fn test_create_read_delete() {
        let reconciler = setup();
        let state = reconciler.create(ACL_ARN, custom("bots", 1)).await.unwrap();
        assert_eq!(state.resource_id(), "a1/shop-acl/REGIONAL/bots");

        let read = reconciler.read(&state.identity).await.unwrap().unwrap();
        assert_eq!(read.rule, custom("bots", 1));

        reconciler.delete(&state).await.unwrap();
        assert!(reconciler.read(&state.identity).await.unwrap().is_none());

        // Second delete is a no-op.
        reconciler.delete(&state).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_refuses_identity_change() {
        let reconciler = setup();
        let state = reconciler.create(ACL_ARN, custom("bots", 1)).await.unwrap();

        let renamed = custom("bots-v2", 1);
        assert!(matches!(
            reconciler.update(&state, renamed).await,
            Err(ReconcileError::Validation(ValidationError::RequiresReplacement {
                field: "name",
                ..
            }))
        ));

        let managed = DesiredRule::new(
            "bots",
            1,
            RuleStatementSpec::managed(ManagedRuleGroupStatement {
                vendor_name: "AWS".to_string(),
                name: "AWSManagedRulesBotControlRuleSet".to_string(),
                version: None,
                rule_action_overrides: vec![],
                managed_rule_group_configs: vec![],
            }),
        );
        assert!(matches!(
            reconciler.update(&state, managed).await,
            Err(ReconcileError::Validation(ValidationError::RequiresReplacement {
                field: "rule_group_type",
                ..
            }))
        ));
        assert_eq!(reconciler.repository().write_count(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_rule_fails() {
        let reconciler = setup();
        let state = reconciler.create(ACL_ARN, custom("bots", 1)).await.unwrap();
        reconciler.delete(&state).await.unwrap();

        let err = reconciler
            .update(&state, custom("bots", 2).with_override_action(OverrideAction::Count))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::RuleNotFound { .. }));
    }

    #[tokio::test]
    async fn test_name_collision_on_read_and_delete() {
        let reconciler = setup();
        reconciler.create(ACL_ARN, custom("shared", 1)).await.unwrap();

        let other = RuleIdentity::new(
            ACL_ARN,
            RuleDescriptor::new(
                "shared",
                RuleGroupKey::managed("AWS", "AWSManagedRulesCommonRuleSet", None),
            ),
        )
        .unwrap();
        assert!(matches!(
            reconciler.read(&other).await,
            Err(ReconcileError::Invariant(InvariantError::DuplicateName { .. }))
        ));

        let state = RuleState::new(other, custom("shared", 1));
        reconciler.delete(&state).await.unwrap();
        assert_eq!(reconciler.repository().write_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_container() {
        let reconciler = Reconciler::new(Arc::new(InMemoryRepository::new()), ReconcilerConfig::default());
        let identity = reconciler
            .import(&format!("{},bots,custom,{}", ACL_ARN, GROUP_ARN))
            .unwrap();

        assert!(reconciler.read(&identity).await.unwrap().is_none());
        assert!(matches!(
            reconciler.create(ACL_ARN, custom("bots", 1)).await,
            Err(ReconcileError::Repository(RepositoryError::NotFound(_)))
        ));
        let state = RuleState::new(identity, custom("bots", 1));
        reconciler.delete(&state).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_after_container_removed() {
        let reconciler = setup();
        let state = reconciler.create(ACL_ARN, custom("bots", 1)).await.unwrap();
        assert!(reconciler
            .repository()
            .remove_container(&state.identity.container));

        let err = reconciler.update(&state, custom("bots", 2)).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Repository(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unparseable_owned_rule_fails_only_when_targeted() {
        let reconciler = setup();
        let state = reconciler.create(ACL_ARN, custom("bots", 1)).await.unwrap();

        let scoped: Rule = serde_json::from_value(serde_json::json!({
            "name": "common",
            "priority": 2,
            "statement": {"managed_rule_group": {
                "vendor_name": "AWS",
                "name": "AWSManagedRulesCommonRuleSet",
                "scope_down_statement": {"geo_match_statement": {"country_codes": ["US"]}}
            }},
            "override_action": "none",
            "visibility_config": {
                "sampled_requests_enabled": true,
                "cloudwatch_metrics_enabled": true,
                "metric_name": "common"
            }
        }))
        .unwrap();
        let key = state.identity.container.clone();
        let mut rules = reconciler.repository().snapshot(&key).unwrap().rules;
        rules.push(scoped.clone());
        reconciler
            .repository()
            .put_container(key.clone(), Some(ACL_ARN.to_string()), rules);

        // Our own rule is unaffected by the sibling it cannot model.
        let updated = reconciler
            .update(&state, custom("bots", 3))
            .await
            .unwrap();
        assert_eq!(
            reconciler.read(&updated.identity).await.unwrap().unwrap().rule,
            custom("bots", 3)
        );
        let stored = reconciler.repository().snapshot(&key).unwrap().rules;
        assert_eq!(
            serde_json::to_value(&stored[1]).unwrap(),
            serde_json::to_value(&scoped).unwrap()
        );

        // Targeting the scoped rule itself surfaces the decode error.
        let common = RuleIdentity::new(
            ACL_ARN,
            RuleDescriptor::new(
                "common",
                RuleGroupKey::managed("AWS", "AWSManagedRulesCommonRuleSet", None),
            ),
        )
        .unwrap();
        assert!(matches!(
            reconciler.read(&common).await,
            Err(ReconcileError::Validation(ValidationError::Malformed { .. }))
        ));
    }
}
