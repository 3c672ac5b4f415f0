//! Failure handling: retries, timeouts, fail-fast, tracker and sink faults.

use std::sync::Arc;
use std::time::Duration;

use quill_engine::quill_journal::{RunJournal, RunStatus, RunTracker};
use quill_engine::quill_providers::{CredentialRotator, PoolConfig, SubTaskError, WorkerPool};
use quill_engine::quill_types::{Credential, FailurePolicy, SplitPolicy, Window};
use quill_engine::{
    CollectingSink, GenerateError, GenerateFut, Generator, OutputSink, RunnerError, SinkError,
    WindowContext, WindowError, WindowResult, WindowRunner,
};

use crate::common::{BrokenTracker, ScriptedGenerator, count_planner, runner_config};

fn fails_window_one() -> ScriptedGenerator {
    ScriptedGenerator::new(|window, _| {
        if window.index() == 1 {
            Err(GenerateError::Failed("boom".to_string()))
        } else {
            Ok(())
        }
    })
}

#[tokio::test]
async fn broken_tracker_does_not_block_processing() {
    let planner = count_planner(300, 100, 0.0, 1);
    let mut tracker = BrokenTracker;
    let generator = ScriptedGenerator::always_ok();
    let mut sink = CollectingSink::new();

    let summary = WindowRunner::new(&mut tracker, &generator, &mut sink, runner_config(&planner))
        .run(planner.windows())
        .await
        .unwrap();

    assert_eq!(summary.completed(), 3);
    assert_eq!(sink.results().len(), 3);
}

#[tokio::test]
async fn continue_policy_records_failure_and_moves_on() {
    let planner = count_planner(300, 100, 0.0, 1);
    let mut journal = RunJournal::open_in_memory().unwrap();
    let generator = fails_window_one();
    let mut sink = CollectingSink::new();

    let summary = WindowRunner::new(&mut journal, &generator, &mut sink, runner_config(&planner))
        .run(planner.windows())
        .await
        .unwrap();

    assert_eq!(summary.completed(), 2);
    assert_eq!(summary.failed(), 1);
    assert_eq!(generator.calls(), ["window-0", "window-1", "window-2"]);
    let (report, error) = summary.failures().next().unwrap();
    assert_eq!(report.label, "window-1");
    assert_eq!(*error, WindowError::Generator("boom".to_string()));

    let failed: Vec<_> = journal
        .tail(10)
        .unwrap()
        .into_iter()
        .filter(|r| r.status == RunStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].stage, "window-1");
    assert_eq!(failed[0].error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn fail_fast_halts_after_first_failure() {
    let planner = count_planner(300, 100, 0.0, 1);
    let mut journal = RunJournal::open_in_memory().unwrap();
    let generator = fails_window_one();
    let mut sink = CollectingSink::new();
    let mut config = runner_config(&planner);
    config.failure_policy = FailurePolicy::FailFast;

    let result = WindowRunner::new(&mut journal, &generator, &mut sink, config)
        .run(planner.windows())
        .await;

    let Err(RunnerError::Halted { cause, summary }) = result else {
        panic!("expected the run to halt");
    };
    assert_eq!(cause, WindowError::Generator("boom".to_string()));
    assert_eq!(summary.completed(), 1);
    assert_eq!(summary.failed(), 1);
    assert_eq!(generator.calls(), ["window-0", "window-1"]);
    // Work done before the failure stays committed.
    assert_eq!(sink.results().len(), 1);
    assert!(journal.has_completed(&summary.reports[0].fingerprint).unwrap());
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let planner = count_planner(100, 100, 0.0, 1);
    let mut journal = RunJournal::open_in_memory().unwrap();
    let generator = ScriptedGenerator::new(|_, attempt| {
        if attempt < 3 {
            Err(GenerateError::Transient("rate limited".to_string()))
        } else {
            Ok(())
        }
    });
    let mut sink = CollectingSink::new();

    let summary = WindowRunner::new(&mut journal, &generator, &mut sink, runner_config(&planner))
        .run(planner.windows())
        .await
        .unwrap();

    assert_eq!(summary.completed(), 1);
    assert_eq!(summary.generator_calls, 3);

    let mut rows = journal.tail(10).unwrap();
    rows.reverse();
    let attempts: Vec<_> = rows.iter().map(|r| (r.attempt, r.status)).collect();
    assert_eq!(
        attempts,
        [
            (1, RunStatus::Failed),
            (2, RunStatus::Failed),
            (3, RunStatus::Completed),
        ]
    );
    assert!(rows[0].error.as_deref().unwrap().ends_with("retrying"));
}

#[tokio::test(start_paused = true)]
async fn transient_failure_gives_up_after_retry_budget() {
    let planner = count_planner(100, 100, 0.0, 1);
    let mut journal = RunJournal::open_in_memory().unwrap();
    let generator =
        ScriptedGenerator::new(|_, _| Err(GenerateError::Transient("rate limited".to_string())));
    let mut sink = CollectingSink::new();

    let summary = WindowRunner::new(&mut journal, &generator, &mut sink, runner_config(&planner))
        .run(planner.windows())
        .await
        .unwrap();

    let (_, error) = summary.failures().next().unwrap();
    assert_eq!(
        *error,
        WindowError::Transient {
            attempts: 3,
            message: "rate limited".to_string(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn slow_generator_times_out() {
    let planner = count_planner(100, 100, 0.0, 1);
    let mut journal = RunJournal::open_in_memory().unwrap();
    let generator = ScriptedGenerator::always_ok().with_delay(Duration::from_secs(10));
    let mut sink = CollectingSink::new();
    let mut config = runner_config(&planner);
    config.call_timeout = Some(Duration::from_secs(1));
    config.retry = config.retry.with_max_retries(1);

    let summary = WindowRunner::new(&mut journal, &generator, &mut sink, config)
        .run(planner.windows())
        .await
        .unwrap();

    assert_eq!(summary.generator_calls, 2);
    let (_, error) = summary.failures().next().unwrap();
    assert_eq!(
        *error,
        WindowError::TimedOut {
            after: Duration::from_secs(1),
            attempts: 2,
        }
    );
    assert!(sink.results().is_empty());
}

/// Rejects results for one label.
struct PickySink {
    reject: &'static str,
    accepted: Vec<String>,
}

impl OutputSink<String> for PickySink {
    fn emit(&mut self, result: WindowResult<String>) -> Result<(), SinkError> {
        if result.label == self.reject {
            return Err(SinkError {
                label: result.label,
                message: "disk full".to_string(),
            });
        }
        self.accepted.push(result.output);
        Ok(())
    }
}

#[tokio::test]
async fn rejected_output_leaves_window_incomplete() {
    let planner = count_planner(300, 100, 0.0, 1);
    let mut journal = RunJournal::open_in_memory().unwrap();
    let generator = ScriptedGenerator::always_ok();
    let mut sink = PickySink {
        reject: "window-1",
        accepted: Vec::new(),
    };

    let summary = WindowRunner::new(&mut journal, &generator, &mut sink, runner_config(&planner))
        .run(planner.windows())
        .await
        .unwrap();

    assert_eq!(sink.accepted, ["window-0:100", "window-2:100"]);
    let (report, error) = summary.failures().next().unwrap();
    assert!(matches!(error, WindowError::Sink(_)));
    assert!(!journal.has_completed(&report.fingerprint).unwrap());
}

#[tokio::test]
async fn proportional_split_uses_size_estimate() {
    let planner = count_planner(300, 300, 0.0, 1);
    let mut journal = RunJournal::open_in_memory().unwrap();
    let generator = ScriptedGenerator::new(|window, _| {
        if window.split_depth() == 0 {
            Err(GenerateError::size_exceeded_by(250, 100))
        } else {
            Ok(())
        }
    });
    let mut sink = CollectingSink::new();
    let mut config = runner_config(&planner);
    config.split_policy = SplitPolicy::Proportional;

    let summary = WindowRunner::new(&mut journal, &generator, &mut sink, config)
        .run(planner.windows())
        .await
        .unwrap();

    assert_eq!(summary.splits(), 1);
    let outputs: Vec<_> = sink.outputs().cloned().collect();
    assert_eq!(
        outputs,
        ["window-0.0:100", "window-0.1:100", "window-0.2:100"]
    );
}

/// Fans each event out to the pool and reports how many sub-tasks succeeded.
struct FanOutGenerator;

impl Generator for FanOutGenerator {
    type Output = usize;

    fn generate<'a>(
        &'a self,
        window: &'a Window,
        ctx: WindowContext<'a>,
    ) -> GenerateFut<'a, usize> {
        Box::pin(async move {
            let pool = ctx
                .pool
                .ok_or_else(|| GenerateError::Failed("no worker pool".to_string()))?;
            let texts: Vec<String> = window.events().iter().map(|e| e.text.clone()).collect();
            let run = pool
                .run(texts, |text, lease| async move {
                    tokio::task::yield_now().await;
                    if lease.credential().secret().is_empty() {
                        return Err(SubTaskError::Permanent("empty secret".to_string()));
                    }
                    Ok(text.len())
                })
                .await;
            let lengths = run
                .into_results()
                .map_err(|e| GenerateError::Transient(e.to_string()))?;
            Ok(lengths.len())
        })
    }
}

#[tokio::test]
async fn generator_fans_out_through_worker_pool() {
    let planner = count_planner(30, 10, 0.0, 1);
    let mut journal = RunJournal::open_in_memory().unwrap();
    let rotator = Arc::new(
        CredentialRotator::new(vec![
            Credential::new("primary", "sk-one"),
            Credential::new("secondary", "sk-two"),
        ])
        .unwrap(),
    );
    let pool = WorkerPool::new(Arc::clone(&rotator), PoolConfig::default());
    let generator = FanOutGenerator;
    let mut sink = CollectingSink::new();

    let summary = WindowRunner::new(&mut journal, &generator, &mut sink, runner_config(&planner))
        .with_pool(&pool)
        .run(planner.windows())
        .await
        .unwrap();

    assert_eq!(summary.completed(), 3);
    assert_eq!(sink.outputs().copied().collect::<Vec<_>>(), [10, 10, 10]);
    let stats = rotator.stats();
    assert_eq!(stats.acquisitions.iter().map(|(_, n)| n).sum::<u64>(), 30);
    assert!(stats.peak_checked_out <= 2);
    assert_eq!(stats.checked_out, 0);
}
