//! Window scheduling and adaptive execution.
//!
//! # Architecture
//!
//! - [`WindowPlanner`] - partitions an ordered event stream into overlapping windows
//! - [`fingerprint()`] - stable identity of a window under a code and config version
//! - [`WindowRunner`] - drives windows through a [`Generator`] one at a time,
//!   splitting oversized ones and skipping work a [`RunTracker`] already completed
//! - [`split()`] - pure subdivision of a window by its size unit
//!
//! Sub-task fan-out inside a window goes through the
//! [`WorkerPool`](quill_providers::WorkerPool) handed to the generator in its
//! [`WindowContext`].
//!
//! [`RunTracker`]: quill_journal::RunTracker

mod error;
pub mod fingerprint;
mod generator;
pub mod planner;
pub mod runner;
mod sink;
pub mod source;
pub mod splitter;

pub use error::{RunnerError, WindowError};
pub use fingerprint::{DEFAULT_CODE_REF, config_digest, fingerprint};
pub use generator::{GenerateError, GenerateFut, Generator, WindowContext};
pub use planner::{WindowPlan, WindowPlanner};
pub use runner::{RunSummary, RunnerConfig, WindowOutcome, WindowReport, WindowRunner};
pub use sink::{CollectingSink, OutputSink, SinkError, WindowResult};
pub use source::{EventSource, JsonLinesSource, SourceError};
pub use splitter::{SizeHint, SplitError, split, split_into};

pub use quill_journal;
pub use quill_providers;
pub use quill_types;
