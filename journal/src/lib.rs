//! Durable run tracking.
//!
//! Every processing attempt of a window is one run. A run is written as
//! `running` before the generator is called and moved to a terminal state
//! afterwards, so a crash leaves a visible stuck row and a resume can skip any
//! fingerprint that already has a `completed` run.

mod run_journal;
mod sqlite_util;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use quill_types::{ConfigDigest, Fingerprint, RunId};
use thiserror::Error;

pub use run_journal::RunJournal;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("run journal storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("run journal io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("run {run_id} not found")]
    NotFound { run_id: String },
    #[error("run {run_id} is already {status}")]
    InvalidTransition { run_id: String, status: RunStatus },
    #[error("corrupt {column} value in run journal: {value:?}")]
    Corrupt { column: &'static str, value: String },
}

/// Lifecycle state of a run. `running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    /// Not attempted: the fingerprint already had a completed run.
    Skipped,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Skipped => "skipped",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "skipped" => Ok(RunStatus::Skipped),
            other => Err(TrackerError::Corrupt {
                column: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// Everything known about a run when it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRun {
    pub run_id: RunId,
    /// Window label, e.g. `window-3.1`.
    pub stage: String,
    pub fingerprint: Fingerprint,
    pub window_index: u64,
    pub split_depth: u32,
    /// 1-based attempt number for this window.
    pub attempt: u32,
    /// Number of events in the window.
    pub rows_in: u64,
    /// The run whose size failure produced this sub-window.
    pub parent_run_id: Option<RunId>,
    pub code_ref: String,
    pub config_digest: ConfigDigest,
}

/// A persisted run as read back from the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: RunId,
    pub stage: String,
    pub fingerprint: Fingerprint,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub rows_in: u64,
    pub error: Option<String>,
    pub window_index: u64,
    pub split_depth: u32,
    pub attempt: u32,
    pub parent_run_id: Option<RunId>,
    pub code_ref: String,
    pub config_digest: ConfigDigest,
}

/// A run that ended by handing its window to split children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superseded {
    pub run_id: RunId,
    pub parts: usize,
}

/// Persistence of per-attempt run state.
///
/// Object-safe so the runner can hold a `&mut dyn RunTracker` and tests can
/// substitute failing fakes. Write methods update only rows that are still
/// `running`; terminal rows are never reopened.
pub trait RunTracker {
    /// Insert a `running` row. Must be durable before returning.
    fn begin(&mut self, run: &NewRun) -> Result<(), TrackerError>;

    fn complete(&mut self, run_id: &RunId) -> Result<(), TrackerError>;

    fn fail(&mut self, run_id: &RunId, error: &str) -> Result<(), TrackerError>;

    /// Fail a run whose window was replaced by `parts` split children.
    fn supersede(&mut self, run_id: &RunId, parts: usize) -> Result<(), TrackerError>;

    /// Insert a terminal `skipped` row.
    fn skip(&mut self, run: &NewRun) -> Result<(), TrackerError>;

    fn has_completed(&self, fingerprint: &Fingerprint) -> Result<bool, TrackerError>;

    /// The newest split recorded for `fingerprint`, if any.
    fn superseded(&self, fingerprint: &Fingerprint) -> Result<Option<Superseded>, TrackerError>;

    /// The `n` most recently started runs, newest first.
    fn tail(&self, n: usize) -> Result<Vec<RunRecord>, TrackerError>;

    /// Look up a run by full id or unique-enough prefix. The newest match wins.
    fn get(&self, run_id_or_prefix: &str) -> Result<Option<RunRecord>, TrackerError>;

    /// Runs still marked `running`, oldest first.
    fn interrupted(&self) -> Result<Vec<RunRecord>, TrackerError>;
}
