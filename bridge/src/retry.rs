//! Optimistic-concurrency retry loop.
//!
//! One iteration is fetch, merge, submit. The merge step is a pure function of
//! the fetched container. When the submit loses the race (stale version token)
//! or the remote reports the web ACL temporarily unavailable, the driver backs
//! off with jitter and starts over from a fresh fetch.
//!
//! Phases: `Idle -> Fetching -> Merging -> Submitting -> {Done | Fetching | Failed}`
//!
//! Cancellation abandons further attempts promptly. A replace that has
//! already been sent is always awaited, so at most one write happens per
//! iteration and nothing is left half-submitted.

use log::{debug, warn};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use rule_engine::{Container, ContainerKey, Rule, VersionToken};

use crate::config::BackoffConfig;
use crate::error::ReconcileError;
use crate::repository::ContainerRepository;

/// Where the driver is in the current iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverPhase {
    Idle,
    Fetching,
    Merging,
    Submitting,
    Done,
    Failed,
}

/// Output of the merge step.
#[derive(Debug, Clone, PartialEq)]
pub enum MergePlan {
    /// Replace the rule list with these rules.
    Submit(Vec<Rule>),
    /// Nothing to write.
    Unchanged,
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReport {
    /// Fetch/merge/submit iterations, starting at 1.
    pub attempts: u32,
    /// Token after the write, `None` when the plan was `Unchanged`.
    pub version_token: Option<VersionToken>,
}

impl SubmitReport {
    pub fn written(&self) -> bool {
        self.version_token.is_some()
    }
}

/// Exponential backoff with symmetric jitter, capped at `max_delay_ms`.
///
/// `attempt` is zero-based.
pub fn backoff_delay(attempt: u32, config: &BackoffConfig) -> Duration {
    backoff_delay_with_random(attempt, config, rand::random::<f64>())
}

fn backoff_delay_with_random(attempt: u32, config: &BackoffConfig, random: f64) -> Duration {
    let exponential = config
        .base_delay_ms
        .saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(config.max_delay_ms);

    let jitter = 1.0 + (random * 2.0 - 1.0) * config.jitter_factor;
    let delay = (capped as f64 * jitter).round().max(0.0) as u64;
    Duration::from_millis(delay.min(config.max_delay_ms))
}

/// Runs fetch/merge/submit until success, a non-retryable error,
/// cancellation or timeout.
pub struct ConflictRetryDriver<'a, R: ContainerRepository + ?Sized> {
    repository: &'a R,
    backoff: BackoffConfig,
    timeout: Duration,
    cancel: CancellationToken,
}

impl<'a, R: ContainerRepository + ?Sized> ConflictRetryDriver<'a, R> {
    pub fn new(repository: &'a R, backoff: BackoffConfig, timeout: Duration) -> Self {
        Self {
            repository,
            backoff,
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Drive `merge` against `key` until it converges.
    ///
    /// On timeout the last underlying error is returned, or
    /// [`ReconcileError::Timeout`] if the deadline passed while the first
    /// fetch was still outstanding.
    pub async fn run<F>(&self, key: &ContainerKey, mut merge: F) -> Result<SubmitReport, ReconcileError>
    where
        F: FnMut(&Container) -> Result<MergePlan, ReconcileError> + Send,
    {
        let deadline = Instant::now() + self.timeout;
        let mut attempts: u32 = 0;
        let mut phase = DriverPhase::Idle;
        let mut last_error: Option<ReconcileError> = None;

        loop {
            if self.cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled { attempts });
            }
            attempts += 1;

            let err = match self
                .attempt(key, &mut merge, attempts, deadline, &mut phase)
                .await
            {
                Ok(version_token) => {
                    phase = DriverPhase::Done;
                    debug!("{}: {:?} after {} attempt(s)", key, phase, attempts);
                    return Ok(SubmitReport {
                        attempts,
                        version_token,
                    });
                }
                Err(ReconcileError::Timeout { .. }) => {
                    phase = DriverPhase::Failed;
                    warn!(
                        "{}: {:?} on attempt {}, timeout {:?} elapsed while fetching",
                        key, phase, attempts, self.timeout
                    );
                    return Err(last_error.unwrap_or(ReconcileError::Timeout { attempts }));
                }
                Err(e) if !e.is_retryable() => {
                    phase = DriverPhase::Failed;
                    debug!("{}: {:?} on attempt {}: {}", key, phase, attempts, e);
                    return Err(e);
                }
                Err(e) => e,
            };

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "{}: giving up after {} attempt(s), timeout {:?} elapsed: {}",
                    key, attempts, self.timeout, err
                );
                return Err(err);
            }

            let delay = backoff_delay(attempts - 1, &self.backoff).min(deadline - now);
            debug!(
                "{}: attempt {} lost the race ({}), retrying in {:?}",
                key, attempts, err, delay
            );
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(ReconcileError::Cancelled { attempts });
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if Instant::now() >= deadline {
                warn!(
                    "{}: giving up after {} attempt(s), timeout {:?} elapsed: {}",
                    key, attempts, self.timeout, err
                );
                return Err(err);
            }
            last_error = Some(err);
        }
    }

    /// One fetch/merge/submit iteration. Returns the new token, or `None`
    /// when there was nothing to write.
    async fn attempt<F>(
        &self,
        key: &ContainerKey,
        merge: &mut F,
        attempts: u32,
        deadline: Instant,
        phase: &mut DriverPhase,
    ) -> Result<Option<VersionToken>, ReconcileError>
    where
        F: FnMut(&Container) -> Result<MergePlan, ReconcileError> + Send,
    {
        *phase = DriverPhase::Fetching;
        let container = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(ReconcileError::Cancelled { attempts });
            }
            fetched = self.repository.fetch(key) => fetched?,
            _ = tokio::time::sleep_until(deadline) => {
                return Err(ReconcileError::Timeout { attempts });
            }
        };

        *phase = DriverPhase::Merging;
        let rules = match merge(&container)? {
            MergePlan::Unchanged => return Ok(None),
            MergePlan::Submit(rules) => rules,
        };

        *phase = DriverPhase::Submitting;
        debug!(
            "{}: submitting {} rules at version {}",
            key,
            rules.len(),
            container.version_token
        );
        let token = self
            .repository
            .replace(key, rules, &container.version_token)
            .await?;
        Ok(Some(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RepositoryError;
    use crate::memory::InMemoryRepository;
    use crate::repository::ContainerRepository;
    use async_trait::async_trait;
    use rule_engine::Scope;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves `answered` fetches, then never answers again. Every replace
    /// loses the race.
    struct StallingRepository {
        inner: InMemoryRepository,
        answered: usize,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl ContainerRepository for StallingRepository {
        async fn fetch(&self, key: &ContainerKey) -> Result<Container, RepositoryError> {
            if self.fetches.fetch_add(1, Ordering::SeqCst) >= self.answered {
                std::future::pending::<()>().await;
            }
            self.inner.fetch(key).await
        }

        async fn replace(
            &self,
            key: &ContainerKey,
            _rules: Vec<Rule>,
            token: &VersionToken,
        ) -> Result<VersionToken, RepositoryError> {
            Err(RepositoryError::conflict(key, token))
        }
    }

    fn stalling(answered: usize) -> (StallingRepository, ContainerKey) {
        let inner = InMemoryRepository::new();
        let key = ContainerKey::new("a1", "acl", Scope::Regional);
        inner.put_container(key.clone(), None, vec![]);
        let repo = StallingRepository {
            inner,
            answered,
            fetches: AtomicUsize::new(0),
        };
        (repo, key)
    }

    fn backoff() -> BackoffConfig {
        BackoffConfig {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter_factor: 0.2,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = backoff();
        assert_eq!(backoff_delay_with_random(0, &config, 0.5), Duration::from_millis(100));
        assert_eq!(backoff_delay_with_random(2, &config, 0.5), Duration::from_millis(400));
        assert_eq!(backoff_delay_with_random(10, &config, 0.5), Duration::from_millis(1_000));
        assert_eq!(backoff_delay_with_random(0, &config, 0.0), Duration::from_millis(80));
        assert_eq!(backoff_delay_with_random(10, &config, 0.99), Duration::from_millis(1_000));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let config = backoff();
        for attempt in 0..6 {
            let delay = backoff_delay(attempt, &config);
            assert!(delay <= Duration::from_millis(config.max_delay_ms));
        }
    }

    #[tokio::test]
    async fn test_unchanged_plan_does_not_write() {
        let repo = InMemoryRepository::new();
        let key = ContainerKey::new("a1", "acl", Scope::Regional);
        repo.put_container(key.clone(), None, vec![]);

        let driver = ConflictRetryDriver::new(&repo, backoff(), Duration::from_secs(5));
        let report = driver.run(&key, |_| Ok(MergePlan::Unchanged)).await.unwrap();

        assert_eq!(report.attempts, 1);
        assert!(!report.written());
        assert_eq!(repo.write_count(), 0);
    }

    #[tokio::test]
    async fn test_merge_error_is_not_retried() {
        let repo = InMemoryRepository::new();
        let key = ContainerKey::new("a1", "acl", Scope::Regional);
        repo.put_container(key.clone(), None, vec![]);

        let mut calls = 0;
        let driver = ConflictRetryDriver::new(&repo, backoff(), Duration::from_secs(5));
        let err = driver
            .run(&key, |_| {
                calls += 1;
                Err(ReconcileError::RuleNotFound {
                    rule: "r".to_string(),
                    container: "acl".to_string(),
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::RuleNotFound { .. }));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let repo = InMemoryRepository::new();
        let key = ContainerKey::new("a1", "acl", Scope::Regional);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let driver = ConflictRetryDriver::new(&repo, backoff(), Duration::from_secs(5))
            .with_cancellation(cancel);
        let err = driver.run(&key, |_| Ok(MergePlan::Unchanged)).await.unwrap_err();
        assert_eq!(err, ReconcileError::Cancelled { attempts: 0 });
    }

    #[tokio::test]
    async fn test_stalled_first_fetch_times_out() {
        let (repo, key) = stalling(0);
        let driver = ConflictRetryDriver::new(&repo, backoff(), Duration::from_millis(100));

        let started = std::time::Instant::now();
        let err = driver.run(&key, |_| Ok(MergePlan::Unchanged)).await.unwrap_err();

        assert_eq!(err, ReconcileError::Timeout { attempts: 1 });
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_stalled_retry_fetch_returns_last_conflict() {
        let (repo, key) = stalling(1);
        let driver = ConflictRetryDriver::new(&repo, backoff(), Duration::from_millis(300));

        let err = driver
            .run(&key, |_| Ok(MergePlan::Submit(vec![])))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::Repository(RepositoryError::VersionConflict { .. })
        ));
        assert_eq!(repo.fetches.load(Ordering::SeqCst), 2);
    }
}
