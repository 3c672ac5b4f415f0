//! Bounded fan-out of sub-tasks across leased credentials.
//!
//! Every sub-task runs on its own tokio task and holds one
//! [`CredentialLease`](crate::CredentialLease) for its whole life, retries
//! included, so in-flight work never exceeds the number of credentials and no
//! two running sub-tasks share one.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::credentials::{CredentialLease, CredentialRotator};
use crate::retry::{RetryConfig, calculate_retry_delay};

/// Why a sub-task did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubTaskError {
    /// Worth another attempt (rate limit, connection reset, ...).
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("sub-task panicked: {0}")]
    Panicked(String),
    /// Aborted because a sibling failed under fail-fast.
    #[error("cancelled")]
    Cancelled,
}

impl SubTaskError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubTaskError::Transient(_) | SubTaskError::TimedOut(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
    /// Wall-clock bound on each attempt.
    pub call_timeout: Option<Duration>,
    pub retry: RetryConfig,
    /// Abort the remaining sub-tasks after the first failure.
    pub fail_fast: bool,
}

/// Outcome of one sub-task.
#[derive(Debug)]
pub struct SubTaskReport<T> {
    /// Position of the sub-task's input.
    pub id: usize,
    /// Attempts started; 0 if the sub-task never got a credential.
    pub attempts: u32,
    pub result: Result<T, SubTaskError>,
}

/// All reports of one [`WorkerPool::run`], in input order.
#[derive(Debug)]
pub struct PoolRun<T> {
    pub reports: Vec<SubTaskReport<T>>,
}

impl<T> PoolRun<T> {
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.reports.iter().all(|r| r.result.is_ok())
    }

    /// Successful values in input order.
    pub fn successes(&self) -> impl Iterator<Item = &T> {
        self.reports.iter().filter_map(|r| r.result.as_ref().ok())
    }

    /// First failure in input order, if any.
    #[must_use]
    pub fn first_error(&self) -> Option<&SubTaskError> {
        self.reports.iter().find_map(|r| r.result.as_ref().err())
    }

    /// All values in input order, or the first failure.
    pub fn into_results(self) -> Result<Vec<T>, SubTaskError> {
        self.reports.into_iter().map(|r| r.result).collect()
    }
}

/// Runs sub-tasks concurrently, bounded by the rotator's credential count.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    rotator: Arc<CredentialRotator>,
    config: PoolConfig,
}

impl WorkerPool {
    #[must_use]
    pub fn new(rotator: Arc<CredentialRotator>, config: PoolConfig) -> Self {
        Self { rotator, config }
    }

    /// Maximum number of sub-tasks in flight.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.rotator.len()
    }

    #[must_use]
    pub fn rotator(&self) -> &Arc<CredentialRotator> {
        &self.rotator
    }

    /// Run `work` once per input, each call with a credential it holds
    /// exclusively. Retries reuse the same credential.
    ///
    /// `work` receives the lease itself, so the credential stays reachable
    /// only while its slot is held.
    pub async fn run<I, T, F, Fut>(&self, inputs: Vec<I>, work: F) -> PoolRun<T>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        F: Fn(I, Arc<CredentialLease>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, SubTaskError>> + Send + 'static,
    {
        let total = inputs.len();
        let work = Arc::new(work);
        let mut join_set = JoinSet::new();
        let mut ids = HashMap::with_capacity(total);
        let attempts: Vec<Arc<AtomicU32>> = (0..total).map(|_| Arc::new(AtomicU32::new(0))).collect();

        for (id, input) in inputs.into_iter().enumerate() {
            let rotator = Arc::clone(&self.rotator);
            let work = Arc::clone(&work);
            let attempts = Arc::clone(&attempts[id]);
            let call_timeout = self.config.call_timeout;
            let retry = self.config.retry.clone();

            let handle = join_set.spawn(async move {
                let lease = match rotator.acquire().await {
                    Ok(lease) => Arc::new(lease),
                    Err(e) => return Err(SubTaskError::Permanent(e.to_string())),
                };
                loop {
                    let attempt = attempts.fetch_add(1, Ordering::AcqRel) + 1;
                    let call = (*work)(input.clone(), Arc::clone(&lease));
                    let outcome = match call_timeout {
                        Some(limit) => tokio::time::timeout(limit, call)
                            .await
                            .unwrap_or(Err(SubTaskError::TimedOut(limit))),
                        None => call.await,
                    };
                    match outcome {
                        Err(e) if e.is_retryable() && retry.allows_another(attempt) => {
                            let delay = calculate_retry_delay(attempt - 1, &retry);
                            warn!(
                                subtask = id,
                                attempt,
                                slot = lease.slot(),
                                error = %e,
                                delay_ms = delay.as_millis() as u64,
                                "Sub-task failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        other => return other,
                    }
                }
            });
            ids.insert(handle.id(), id);
        }
        debug!(subtasks = total, concurrency = self.concurrency(), "Worker pool started");

        let mut slots: Vec<Option<Result<T, SubTaskError>>> = (0..total).map(|_| None).collect();
        let mut aborted = false;
        while let Some(joined) = join_set.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((task_id, result)) => (ids.get(&task_id).copied(), result),
                Err(join_error) => {
                    let id = ids.get(&join_error.id()).copied();
                    let result = if join_error.is_panic() {
                        let message = panic_message(join_error.into_panic());
                        error!(subtask = ?id, panic = %message, "Sub-task panicked");
                        Err(SubTaskError::Panicked(message))
                    } else {
                        Err(SubTaskError::Cancelled)
                    };
                    (id, result)
                }
            };
            let Some(id) = id else { continue };

            if self.config.fail_fast
                && !aborted
                && let Err(e) = &result
            {
                warn!(subtask = id, error = %e, "Sub-task failed, cancelling siblings");
                join_set.abort_all();
                aborted = true;
            }
            slots[id] = Some(result);
        }

        let reports = slots
            .into_iter()
            .enumerate()
            .map(|(id, result)| SubTaskReport {
                id,
                attempts: attempts[id].load(Ordering::Acquire),
                result: result.unwrap_or(Err(SubTaskError::Cancelled)),
            })
            .collect();
        PoolRun { reports }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
