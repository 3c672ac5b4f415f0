//! Sequential window execution with size-driven splitting.
//!
//! Windows are pulled lazily from the plan into a front-pushable queue. A
//! window the generator refuses as too large is replaced, at the front of the
//! queue, by its split children, so deeply split windows never grow the call
//! stack and stream order is preserved.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use quill_journal::{NewRun, RunTracker, TrackerError};
use quill_providers::{RetryConfig, WorkerPool, calculate_retry_delay};
use quill_types::{ConfigDigest, FailurePolicy, Fingerprint, RunId, SplitPolicy, Window};

use crate::error::{RunnerError, WindowError};
use crate::fingerprint::{DEFAULT_CODE_REF, fingerprint};
use crate::generator::{GenerateError, Generator, WindowContext};
use crate::sink::{OutputSink, WindowResult};
use crate::splitter::{split, split_into};

/// Runner policy.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub max_split_depth: u32,
    pub failure_policy: FailurePolicy,
    pub split_policy: SplitPolicy,
    /// Splits never produce parts measuring below this (count and byte windows).
    pub min_window_size: u64,
    /// Wall-clock bound on each generator call.
    pub call_timeout: Option<Duration>,
    pub retry: RetryConfig,
    pub code_ref: String,
    pub config_digest: ConfigDigest,
}

impl RunnerConfig {
    #[must_use]
    pub fn new(config_digest: ConfigDigest) -> Self {
        Self {
            max_split_depth: 5,
            failure_policy: FailurePolicy::Continue,
            split_policy: SplitPolicy::Halve,
            min_window_size: 1,
            call_timeout: None,
            retry: RetryConfig::default(),
            code_ref: DEFAULT_CODE_REF.to_string(),
            config_digest,
        }
    }
}

/// How one dequeued window ended.
#[derive(Debug)]
pub enum WindowOutcome {
    Completed { run_id: RunId, attempts: u32 },
    /// A completed run with the same fingerprint already existed.
    Skipped,
    /// Replaced by `parts` sub-windows queued ahead of everything else.
    Split { run_id: RunId, parts: usize },
    Failed { error: WindowError, attempts: u32 },
}

#[derive(Debug)]
pub struct WindowReport {
    pub label: String,
    pub window_index: u64,
    pub split_depth: u32,
    pub fingerprint: Fingerprint,
    pub outcome: WindowOutcome,
}

/// What a run did, window by window, in processing order.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports: Vec<WindowReport>,
    pub generator_calls: u64,
}

impl RunSummary {
    fn count(&self, pred: impl Fn(&WindowOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }

    #[must_use]
    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, WindowOutcome::Completed { .. }))
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, WindowOutcome::Skipped))
    }

    #[must_use]
    pub fn splits(&self) -> usize {
        self.count(|o| matches!(o, WindowOutcome::Split { .. }))
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, WindowOutcome::Failed { .. }))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&WindowReport, &WindowError)> {
        self.reports.iter().filter_map(|r| match &r.outcome {
            WindowOutcome::Failed { error, .. } => Some((r, error)),
            _ => None,
        })
    }
}

/// A queued window and the run whose size failure produced it.
struct Pending {
    window: Window,
    parent_run_id: Option<RunId>,
}

/// Put `children` at the front of the queue, in order.
fn enqueue_children(queue: &mut VecDeque<Pending>, children: Vec<Window>, parent: &RunId) {
    for child in children.into_iter().rev() {
        queue.push_front(Pending {
            window: child,
            parent_run_id: Some(parent.clone()),
        });
    }
}

/// Drives windows through a generator, one at a time.
pub struct WindowRunner<'a, G: Generator, S> {
    tracker: &'a mut dyn RunTracker,
    generator: &'a G,
    sink: &'a mut S,
    pool: Option<&'a WorkerPool>,
    config: RunnerConfig,
}

impl<'a, G, S> WindowRunner<'a, G, S>
where
    G: Generator,
    S: OutputSink<G::Output>,
{
    pub fn new(
        tracker: &'a mut dyn RunTracker,
        generator: &'a G,
        sink: &'a mut S,
        config: RunnerConfig,
    ) -> Self {
        Self {
            tracker,
            generator,
            sink,
            pool: None,
            config,
        }
    }

    /// Make `pool` available to the generator for sub-task fan-out.
    #[must_use]
    pub fn with_pool(mut self, pool: &'a WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Process every window the plan yields, plus any split children.
    ///
    /// Under [`FailurePolicy::FailFast`] the first failed window stops the
    /// run and the summary so far is returned inside the error.
    pub async fn run(
        &mut self,
        windows: impl IntoIterator<Item = Window>,
    ) -> Result<RunSummary, RunnerError> {
        self.report_interrupted();

        let mut plan = windows.into_iter();
        let mut queue: VecDeque<Pending> = VecDeque::new();
        let mut summary = RunSummary::default();

        loop {
            let pending = match queue.pop_front() {
                Some(pending) => pending,
                None => match plan.next() {
                    Some(window) => Pending {
                        window,
                        parent_run_id: None,
                    },
                    None => break,
                },
            };
            if pending.window.is_empty() {
                debug!(window = %pending.window.label(), "Skipping empty window");
                continue;
            }

            let label = pending.window.label();
            let window_index = pending.window.index();
            let split_depth = pending.window.split_depth();
            let window_fingerprint = fingerprint(
                &pending.window,
                &self.config.code_ref,
                &self.config.config_digest,
            );

            let outcome = self
                .process(
                    pending,
                    &window_fingerprint,
                    &mut queue,
                    &mut summary.generator_calls,
                )
                .await;

            let halt_cause = match &outcome {
                WindowOutcome::Failed { error, .. }
                    if self.config.failure_policy == FailurePolicy::FailFast =>
                {
                    Some(error.clone())
                }
                _ => None,
            };
            summary.reports.push(WindowReport {
                label,
                window_index,
                split_depth,
                fingerprint: window_fingerprint,
                outcome,
            });

            if let Some(cause) = halt_cause {
                error!(
                    pending = queue.len(),
                    error = %cause,
                    "Halting run after window failure"
                );
                return Err(RunnerError::Halted {
                    cause,
                    summary: Box::new(summary),
                });
            }
        }

        info!(
            completed = summary.completed(),
            skipped = summary.skipped(),
            splits = summary.splits(),
            failed = summary.failed(),
            generator_calls = summary.generator_calls,
            "Run finished"
        );
        Ok(summary)
    }

    fn report_interrupted(&self) {
        match self.tracker.interrupted() {
            Ok(runs) => {
                for run in runs {
                    warn!(
                        run_id = %run.run_id,
                        stage = %run.stage,
                        started_at = %run.started_at,
                        "Found interrupted run from an earlier process"
                    );
                }
            }
            Err(e) => warn!(error = %e, "Could not list interrupted runs"),
        }
    }

    /// Log and swallow tracker write failures.
    fn track(
        &mut self,
        action: &'static str,
        op: impl FnOnce(&mut dyn RunTracker) -> Result<(), TrackerError>,
    ) {
        if let Err(e) = op(&mut *self.tracker) {
            warn!(action, error = %e, "Run tracker write failed; continuing");
        }
    }

    async fn process(
        &mut self,
        pending: Pending,
        fingerprint: &Fingerprint,
        queue: &mut VecDeque<Pending>,
        generator_calls: &mut u64,
    ) -> WindowOutcome {
        let Pending {
            window,
            parent_run_id,
        } = pending;
        let label = window.label();

        let already_done = self.tracker.has_completed(fingerprint).unwrap_or_else(|e| {
            warn!(window = %label, error = %e, "Completion check failed; reprocessing window");
            false
        });
        if already_done {
            info!(
                window = %label,
                fingerprint = %fingerprint.short(),
                "Window skipped, already completed"
            );
            let run = self.new_run(&window, fingerprint, 0, parent_run_id);
            self.track("skip", |t| t.skip(&run));
            return WindowOutcome::Skipped;
        }

        if let Some(outcome) = self.replay_split(&window, &label, fingerprint, queue) {
            return outcome;
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let run = self.new_run(&window, fingerprint, attempt, parent_run_id.clone());
            self.track("begin", |t| t.begin(&run));
            info!(
                window = %label,
                run_id = %run.run_id.short(),
                attempt,
                events = window.len(),
                size = window.size_metric(),
                unit = %window.unit(),
                "Processing window"
            );

            *generator_calls += 1;
            let ctx = WindowContext {
                run_id: &run.run_id,
                attempt,
                pool: self.pool,
            };
            let generator = self.generator;
            let call = generator.generate(&window, ctx);
            let result = match self.config.call_timeout {
                Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| limit),
                None => Ok(call.await),
            };

            let failure = match result {
                Ok(Ok(output)) => {
                    let delivered = self.sink.emit(WindowResult {
                        window_index: window.index(),
                        split_depth: window.split_depth(),
                        label: label.clone(),
                        core: window.core_range(),
                        fingerprint: fingerprint.clone(),
                        run_id: run.run_id.clone(),
                        output,
                    });
                    return match delivered {
                        Ok(()) => {
                            self.track("complete", |t| t.complete(&run.run_id));
                            info!(window = %label, run_id = %run.run_id.short(), "Window completed");
                            WindowOutcome::Completed {
                                run_id: run.run_id,
                                attempts: attempt,
                            }
                        }
                        Err(e) => self.fail(&run.run_id, &label, WindowError::Sink(e), attempt),
                    };
                }
                Ok(Err(GenerateError::SizeExceeded { .. }))
                    if window.split_depth() >= self.config.max_split_depth =>
                {
                    let error = WindowError::SplitDepthExceeded {
                        window_index: window.index(),
                        depth: window.split_depth(),
                        max_depth: self.config.max_split_depth,
                    };
                    return self.fail(&run.run_id, &label, error, attempt);
                }
                Ok(Err(size_error @ GenerateError::SizeExceeded { .. })) => {
                    return self.split(&window, &run.run_id, &label, &size_error, queue, attempt);
                }
                Ok(Err(GenerateError::Transient(message))) => WindowError::Transient {
                    attempts: attempt,
                    message,
                },
                Err(after) => WindowError::TimedOut {
                    after,
                    attempts: attempt,
                },
                Ok(Err(GenerateError::Failed(message))) => {
                    let error = WindowError::Generator(message);
                    return self.fail(&run.run_id, &label, error, attempt);
                }
            };

            if !self.config.retry.allows_another(attempt) {
                return self.fail(&run.run_id, &label, failure, attempt);
            }
            let delay = calculate_retry_delay(attempt - 1, &self.config.retry);
            warn!(
                window = %label,
                run_id = %run.run_id.short(),
                attempt,
                error = %failure,
                delay_ms = delay.as_millis() as u64,
                "Window attempt failed, retrying"
            );
            let note = format!("{failure}; retrying");
            self.track("fail", |t| t.fail(&run.run_id, &note));
            tokio::time::sleep(delay).await;
        }
    }

    /// Requeue the children of a split an earlier process already recorded
    /// for this fingerprint, without calling the generator on the parent.
    fn replay_split(
        &self,
        window: &Window,
        label: &str,
        fingerprint: &Fingerprint,
        queue: &mut VecDeque<Pending>,
    ) -> Option<WindowOutcome> {
        let prior = match self.tracker.superseded(fingerprint) {
            Ok(prior) => prior?,
            Err(e) => {
                warn!(window = %label, error = %e, "Split lookup failed; reprocessing window");
                return None;
            }
        };
        match split_into(window, prior.parts, self.config.min_window_size) {
            Ok(children) => {
                let parts = children.len();
                info!(
                    window = %label,
                    run_id = %prior.run_id.short(),
                    parts,
                    "Window already split, requeuing its parts"
                );
                enqueue_children(queue, children, &prior.run_id);
                Some(WindowOutcome::Split {
                    run_id: prior.run_id,
                    parts,
                })
            }
            Err(e) => {
                debug!(window = %label, reason = %e, "Recorded split no longer applies");
                None
            }
        }
    }

    fn split(
        &mut self,
        window: &Window,
        run_id: &RunId,
        label: &str,
        size_error: &GenerateError,
        queue: &mut VecDeque<Pending>,
        attempt: u32,
    ) -> WindowOutcome {
        let hint = size_error.size_hint();
        match split(
            window,
            self.config.split_policy,
            hint,
            self.config.min_window_size,
        ) {
            Ok(children) => {
                let parts = children.len();
                warn!(
                    window = %label,
                    depth = window.split_depth() + 1,
                    parts,
                    "Window too large, splitting"
                );
                self.track("supersede", |t| t.supersede(run_id, parts));
                enqueue_children(queue, children, run_id);
                WindowOutcome::Split {
                    run_id: run_id.clone(),
                    parts,
                }
            }
            Err(e) => {
                debug!(window = %label, reason = %e, "Window cannot be split further");
                let error = WindowError::SplitDepthExceeded {
                    window_index: window.index(),
                    depth: window.split_depth(),
                    max_depth: self.config.max_split_depth,
                };
                self.fail(run_id, label, error, attempt)
            }
        }
    }

    fn fail(
        &mut self,
        run_id: &RunId,
        label: &str,
        error: WindowError,
        attempts: u32,
    ) -> WindowOutcome {
        error!(window = %label, run_id = %run_id.short(), error = %error, "Window failed");
        let message = error.to_string();
        self.track("fail", |t| t.fail(run_id, &message));
        WindowOutcome::Failed { error, attempts }
    }

    fn new_run(
        &self,
        window: &Window,
        fingerprint: &Fingerprint,
        attempt: u32,
        parent_run_id: Option<RunId>,
    ) -> NewRun {
        NewRun {
            run_id: RunId::generate(),
            stage: window.label(),
            fingerprint: fingerprint.clone(),
            window_index: window.index(),
            split_depth: window.split_depth(),
            attempt,
            rows_in: window.len() as u64,
            parent_run_id,
            code_ref: self.config.code_ref.clone(),
            config_digest: self.config.config_digest.clone(),
        }
    }
}
