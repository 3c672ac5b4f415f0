//! End-to-end scenarios: planning, splitting and idempotent resume.

use std::collections::HashSet;
use std::time::Duration;

use quill_engine::quill_journal::{RunJournal, RunStatus, RunTracker};
use quill_engine::{CollectingSink, GenerateError, WindowError, WindowOutcome, WindowRunner};

use crate::common::{ScriptedGenerator, count_planner, runner_config};

#[tokio::test]
async fn thousand_events_make_ten_overlapping_windows() {
    let planner = count_planner(1000, 100, 0.2, 10);
    let mut journal = RunJournal::open_in_memory().unwrap();
    let generator = ScriptedGenerator::always_ok();
    let mut sink = CollectingSink::new();

    let summary = WindowRunner::new(&mut journal, &generator, &mut sink, runner_config(&planner))
        .run(planner.windows())
        .await
        .unwrap();

    assert_eq!(summary.completed(), 10);
    assert_eq!(summary.generator_calls, 10);
    let results = sink.results();
    assert_eq!(results.len(), 10);
    assert_eq!(results[0].output, "window-0:100");
    for result in &results[1..] {
        assert_eq!(result.output, format!("{}:120", result.label));
    }

    // Cores cover the stream exactly once, in order.
    let mut cursor = 0;
    for result in results {
        assert_eq!(result.core.start, cursor);
        cursor = result.core.end;
    }
    assert_eq!(cursor, 1000);
}

#[tokio::test]
async fn oversized_window_is_halved_and_order_is_kept() {
    let planner = count_planner(300, 100, 0.0, 1);
    let mut journal = RunJournal::open_in_memory().unwrap();
    let generator = ScriptedGenerator::new(|window, _| {
        if window.index() == 1 && window.split_depth() == 0 {
            return Err(GenerateError::size_exceeded());
        }
        Ok(())
    });
    let mut sink = CollectingSink::new();

    let summary = WindowRunner::new(&mut journal, &generator, &mut sink, runner_config(&planner))
        .run(planner.windows())
        .await
        .unwrap();

    assert_eq!(summary.splits(), 1);
    assert_eq!(summary.completed(), 4);
    assert_eq!(summary.failed(), 0);
    let outputs: Vec<_> = sink.outputs().cloned().collect();
    assert_eq!(
        outputs,
        ["window-0:100", "window-1.0:50", "window-1.1:50", "window-2:100"]
    );
    assert_eq!(
        generator.calls(),
        ["window-0", "window-1", "window-1.0", "window-1.1", "window-2"]
    );

    // The refused attempt is failed (superseded), its children point back at it.
    let parent = summary
        .reports
        .iter()
        .find_map(|r| match &r.outcome {
            WindowOutcome::Split { run_id, parts: 2 } => Some(run_id.clone()),
            _ => None,
        })
        .unwrap();
    let parent_record = journal.get(parent.as_str()).unwrap().unwrap();
    assert_eq!(parent_record.status, RunStatus::Failed);
    assert!(parent_record.error.unwrap().contains("superseded by split"));

    let children: Vec<_> = journal
        .tail(10)
        .unwrap()
        .into_iter()
        .filter(|r| r.split_depth == 1)
        .collect();
    assert_eq!(children.len(), 2);
    for child in children {
        assert_eq!(child.parent_run_id.as_ref(), Some(&parent));
        assert_eq!(child.window_index, 1);
        assert_eq!(child.status, RunStatus::Completed);
    }
}

#[tokio::test]
async fn split_of_overlapping_window_cuts_only_its_core() {
    // window-1 is 50..110: fifty events of context, then a ten-event core.
    let planner = count_planner(110, 100, 0.5, 10);
    let mut journal = RunJournal::open_in_memory().unwrap();
    let generator = ScriptedGenerator::new(|window, _| {
        if window.index() == 1 && window.split_depth() == 0 {
            return Err(GenerateError::size_exceeded());
        }
        Ok(())
    });
    let mut sink = CollectingSink::new();

    let summary = WindowRunner::new(&mut journal, &generator, &mut sink, runner_config(&planner))
        .run(planner.windows())
        .await
        .unwrap();

    assert_eq!(summary.splits(), 1);
    assert_eq!(summary.completed(), 3);
    let outputs: Vec<_> = sink.outputs().cloned().collect();
    assert_eq!(outputs, ["window-0:100", "window-1.0:55", "window-1.1:5"]);

    let results = sink.results();
    assert!(results.iter().all(|result| !result.core.is_empty()));
    let cores: Vec<_> = results.iter().map(|result| result.core.clone()).collect();
    assert_eq!(cores, [0..100, 100..105, 105..110]);
}

#[tokio::test]
async fn overlap_heavy_window_too_small_to_split_fails() {
    let planner = count_planner(110, 100, 0.5, 10);
    let mut journal = RunJournal::open_in_memory().unwrap();
    let generator = ScriptedGenerator::new(|window, _| {
        if window.index() == 1 {
            return Err(GenerateError::size_exceeded());
        }
        Ok(())
    });
    let mut sink = CollectingSink::new();
    let mut config = runner_config(&planner);
    config.min_window_size = 10;

    let summary = WindowRunner::new(&mut journal, &generator, &mut sink, config)
        .run(planner.windows())
        .await
        .unwrap();

    // Halving the ten-event core would leave parts of five.
    assert_eq!(summary.splits(), 0);
    assert_eq!(summary.failed(), 1);
    assert_eq!(generator.calls(), ["window-0", "window-1"]);
    let outputs: Vec<_> = sink.outputs().cloned().collect();
    assert_eq!(outputs, ["window-0:100"]);
}

#[tokio::test]
async fn split_chain_stops_at_max_depth() {
    // Only the leftmost descendant keeps failing: one split per level.
    let planner = count_planner(16, 100, 0.0, 1);
    let mut journal = RunJournal::open_in_memory().unwrap();
    let generator = ScriptedGenerator::new(|window, _| {
        if window.split_path().iter().all(|&ordinal| ordinal == 0) {
            Err(GenerateError::size_exceeded())
        } else {
            Ok(())
        }
    });
    let mut sink = CollectingSink::new();
    let mut config = runner_config(&planner);
    config.max_split_depth = 3;

    let summary = WindowRunner::new(&mut journal, &generator, &mut sink, config)
        .run(planner.windows())
        .await
        .unwrap();

    assert_eq!(summary.splits(), 3);
    assert_eq!(summary.failed(), 1);
    let (report, error) = summary.failures().next().unwrap();
    assert_eq!(report.label, "window-0.0.0.0");
    assert_eq!(
        *error,
        WindowError::SplitDepthExceeded {
            window_index: 0,
            depth: 3,
            max_depth: 3,
        }
    );
    let outputs: Vec<_> = sink.outputs().cloned().collect();
    assert_eq!(
        outputs,
        ["window-0.0.0.1:2", "window-0.0.1:4", "window-0.1:8"]
    );
}

#[tokio::test]
async fn always_oversized_window_terminates() {
    let planner = count_planner(16, 100, 0.0, 1);
    let mut journal = RunJournal::open_in_memory().unwrap();
    let generator = ScriptedGenerator::new(|_, _| Err(GenerateError::size_exceeded()));
    let mut sink = CollectingSink::new();
    let mut config = runner_config(&planner);
    config.max_split_depth = 3;

    let summary = WindowRunner::new(&mut journal, &generator, &mut sink, config)
        .run(planner.windows())
        .await
        .unwrap();

    // A full binary tree of depth 3: 1 + 2 + 4 splits, 8 leaves.
    assert_eq!(summary.splits(), 7);
    assert_eq!(summary.failed(), 8);
    assert_eq!(summary.generator_calls, 15);
    assert!(sink.results().is_empty());
    assert!(summary.failures().all(|(report, error)| report.split_depth == 3
        && matches!(error, WindowError::SplitDepthExceeded { depth: 3, .. })));
}

#[tokio::test]
async fn single_event_window_cannot_split() {
    let planner = count_planner(1, 100, 0.0, 1);
    let mut journal = RunJournal::open_in_memory().unwrap();
    let generator = ScriptedGenerator::new(|_, _| Err(GenerateError::size_exceeded()));
    let mut sink = CollectingSink::new();

    let summary = WindowRunner::new(&mut journal, &generator, &mut sink, runner_config(&planner))
        .run(planner.windows())
        .await
        .unwrap();

    assert_eq!(summary.splits(), 0);
    assert_eq!(generator.calls(), ["window-0"]);
    assert!(matches!(
        summary.failures().next().unwrap().1,
        WindowError::SplitDepthExceeded { depth: 0, .. }
    ));
}

#[tokio::test]
async fn restart_skips_completed_windows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.db");
    let planner = count_planner(1000, 100, 0.2, 10);

    // First process: completes windows 0-4, then "crashes".
    let first = ScriptedGenerator::always_ok();
    {
        let mut journal = RunJournal::open(&path).unwrap();
        let mut sink = CollectingSink::new();
        let summary = WindowRunner::new(&mut journal, &first, &mut sink, runner_config(&planner))
            .run(planner.windows().take(5))
            .await
            .unwrap();
        assert_eq!(summary.completed(), 5);
    }

    // Second process: same input, same config.
    let second = ScriptedGenerator::always_ok();
    let mut journal = RunJournal::open(&path).unwrap();
    let mut sink = CollectingSink::new();
    let summary = WindowRunner::new(&mut journal, &second, &mut sink, runner_config(&planner))
        .run(planner.windows())
        .await
        .unwrap();

    assert_eq!(summary.skipped(), 5);
    assert_eq!(summary.completed(), 5);
    assert_eq!(
        second.calls(),
        ["window-5", "window-6", "window-7", "window-8", "window-9"]
    );
    let first_calls: HashSet<_> = first.calls().into_iter().collect();
    assert!(second.calls().iter().all(|label| !first_calls.contains(label)));

    let skipped = journal
        .tail(100)
        .unwrap()
        .into_iter()
        .filter(|r| r.status == RunStatus::Skipped)
        .count();
    assert_eq!(skipped, 5);
}

#[tokio::test]
async fn resume_requeues_recorded_split_without_calling_parent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.db");
    let planner = count_planner(300, 100, 0.0, 1);

    let first = ScriptedGenerator::new(|window, _| match window.label().as_str() {
        "window-1" => Err(GenerateError::size_exceeded()),
        "window-1.1" => Err(GenerateError::Failed("bad output".to_string())),
        _ => Ok(()),
    });
    let parent = {
        let mut journal = RunJournal::open(&path).unwrap();
        let mut sink = CollectingSink::new();
        let summary = WindowRunner::new(&mut journal, &first, &mut sink, runner_config(&planner))
            .run(planner.windows())
            .await
            .unwrap();
        assert_eq!(summary.failed(), 1);
        summary
            .reports
            .iter()
            .find_map(|r| match &r.outcome {
                WindowOutcome::Split { run_id, .. } => Some(run_id.clone()),
                _ => None,
            })
            .unwrap()
    };

    let second = ScriptedGenerator::always_ok();
    let mut journal = RunJournal::open(&path).unwrap();
    let mut sink = CollectingSink::new();
    let summary = WindowRunner::new(&mut journal, &second, &mut sink, runner_config(&planner))
        .run(planner.windows())
        .await
        .unwrap();

    assert_eq!(second.calls(), ["window-1.1"]);
    assert_eq!(summary.generator_calls, 1);
    assert_eq!(summary.skipped(), 3);
    assert_eq!(summary.splits(), 1);
    assert_eq!(summary.completed(), 1);
    let outputs: Vec<_> = sink.outputs().cloned().collect();
    assert_eq!(outputs, ["window-1.1:50"]);

    // The retried part still points at the run that was split.
    let retried = journal
        .tail(20)
        .unwrap()
        .into_iter()
        .find(|r| r.stage == "window-1.1" && r.status == RunStatus::Completed)
        .unwrap();
    assert_eq!(retried.parent_run_id, Some(parent));
}

#[tokio::test]
async fn changed_config_reprocesses_everything() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.db");
    let planner = count_planner(300, 100, 0.0, 1);

    let generator = ScriptedGenerator::always_ok();
    {
        let mut journal = RunJournal::open(&path).unwrap();
        let mut sink = CollectingSink::new();
        WindowRunner::new(&mut journal, &generator, &mut sink, runner_config(&planner))
            .run(planner.windows())
            .await
            .unwrap();
    }

    let mut journal = RunJournal::open(&path).unwrap();
    let mut sink = CollectingSink::new();
    let mut config = runner_config(&planner);
    config.code_ref = "test-v2".to_string();
    let summary = WindowRunner::new(&mut journal, &generator, &mut sink, config)
        .run(planner.windows())
        .await
        .unwrap();
    assert_eq!(summary.skipped(), 0);
    assert_eq!(summary.completed(), 3);
}

#[tokio::test]
async fn interrupted_run_is_retried_on_resume() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.db");
    let planner = count_planner(200, 100, 0.0, 1);

    // A generator that never returns stands in for a crash mid-call.
    {
        let mut journal = RunJournal::open(&path).unwrap();
        let generator = ScriptedGenerator::always_ok().with_delay(Duration::from_secs(3600));
        let mut sink = CollectingSink::new();
        let mut runner =
            WindowRunner::new(&mut journal, &generator, &mut sink, runner_config(&planner));
        let run = runner.run(planner.windows());
        let _ = tokio::time::timeout(Duration::from_millis(20), run).await;
    }

    let mut journal = RunJournal::open(&path).unwrap();
    let stuck = journal.interrupted().unwrap();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].stage, "window-0");

    let generator = ScriptedGenerator::always_ok();
    let mut sink = CollectingSink::new();
    let summary = WindowRunner::new(&mut journal, &generator, &mut sink, runner_config(&planner))
        .run(planner.windows())
        .await
        .unwrap();
    assert_eq!(summary.completed(), 2);
    assert_eq!(generator.calls(), ["window-0", "window-1"]);
    // The stuck row is left as evidence of the crash.
    assert_eq!(journal.interrupted().unwrap().len(), 1);
}
