//! Shared test utilities and fixtures

#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use quill_engine::quill_journal::{NewRun, RunRecord, RunTracker, Superseded, TrackerError};
use quill_engine::quill_types::{
    ConfigDigest, Event, Fingerprint, RunId, SizeUnit, Window, WindowConfig,
};
use quill_engine::{
    GenerateError, GenerateFut, Generator, RunnerConfig, WindowContext, WindowPlanner,
    config_digest,
};

/// `n` events one minute apart, starting at the epoch.
pub fn events(n: usize) -> Vec<Event> {
    (0..n)
        .map(|i| {
            let at = Utc.timestamp_opt(i as i64 * 60, 0).single().unwrap();
            Event::new(at, format!("author-{}", i % 3), format!("message {i}"))
        })
        .collect()
}

pub fn count_planner(n: usize, step: u64, overlap: f64, min: u64) -> WindowPlanner {
    let config = WindowConfig::new(SizeUnit::Events, step)
        .with_overlap_ratio(overlap)
        .with_min_window_size(min);
    WindowPlanner::new(events(n), config).unwrap()
}

pub fn runner_config(planner: &WindowPlanner) -> RunnerConfig {
    let mut config = RunnerConfig::new(config_digest(planner.config()).unwrap());
    config.code_ref = "test".to_string();
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(40);
    config
}

type Script = dyn Fn(&Window, u32) -> Result<(), GenerateError> + Send + Sync;

/// Generator whose verdict per call is decided by a closure.
///
/// Successful output is `"<label>:<events>"`. Every call is logged.
pub struct ScriptedGenerator {
    script: Box<Script>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(
        script: impl Fn(&Window, u32) -> Result<(), GenerateError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always_ok() -> Self {
        Self::new(|_, _| Ok(()))
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Labels of every window the generator was called with, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Generator for ScriptedGenerator {
    type Output = String;

    fn generate<'a>(
        &'a self,
        window: &'a Window,
        ctx: WindowContext<'a>,
    ) -> GenerateFut<'a, String> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(window.label());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.script)(window, ctx.attempt)?;
            Ok(format!("{}:{}", window.label(), window.len()))
        })
    }
}

/// Tracker whose every operation fails.
pub struct BrokenTracker;

fn broken() -> TrackerError {
    TrackerError::Corrupt {
        column: "status",
        value: "disk on fire".to_string(),
    }
}

impl RunTracker for BrokenTracker {
    fn begin(&mut self, _run: &NewRun) -> Result<(), TrackerError> {
        Err(broken())
    }

    fn complete(&mut self, _run_id: &RunId) -> Result<(), TrackerError> {
        Err(broken())
    }

    fn fail(&mut self, _run_id: &RunId, _error: &str) -> Result<(), TrackerError> {
        Err(broken())
    }

    fn supersede(&mut self, _run_id: &RunId, _parts: usize) -> Result<(), TrackerError> {
        Err(broken())
    }

    fn skip(&mut self, _run: &NewRun) -> Result<(), TrackerError> {
        Err(broken())
    }

    fn has_completed(&self, _fingerprint: &Fingerprint) -> Result<bool, TrackerError> {
        Err(broken())
    }

    fn superseded(&self, _fingerprint: &Fingerprint) -> Result<Option<Superseded>, TrackerError> {
        Err(broken())
    }

    fn tail(&self, _n: usize) -> Result<Vec<RunRecord>, TrackerError> {
        Err(broken())
    }

    fn get(&self, _run_id_or_prefix: &str) -> Result<Option<RunRecord>, TrackerError> {
        Err(broken())
    }

    fn interrupted(&self) -> Result<Vec<RunRecord>, TrackerError> {
        Err(broken())
    }
}

pub fn digest() -> ConfigDigest {
    config_digest(&WindowConfig::default()).unwrap()
}
