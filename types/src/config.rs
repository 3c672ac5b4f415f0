//! Validated windowing and execution policy types.
//!
//! A [`WindowConfig`] that passed [`WindowConfig::validate`] guarantees the
//! planner invariants: a positive step, an overlap ratio in `[0, 0.5]`, and a
//! minimum window no larger than the step.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::TimeRange;

/// Largest overlap ratio the planner accepts.
pub const MAX_OVERLAP_RATIO: f64 = 0.5;

/// Invalid windowing configuration. Always fatal, raised before any window exists.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FatalConfigError {
    #[error("overlap_ratio must be within [0, {MAX_OVERLAP_RATIO}], got {ratio}")]
    OverlapOutOfRange { ratio: f64 },
    #[error("step_size must be greater than zero")]
    ZeroStepSize,
    #[error("min_window_size ({min}) must not exceed step_size ({step})")]
    MinWindowExceedsStep { min: u64, step: u64 },
    #[error("unknown step unit: {0}")]
    UnknownStepUnit(String),
}

/// Unit in which window sizes are measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeUnit {
    /// Number of events.
    #[default]
    Events,
    /// Seconds between first and last event.
    Duration,
    /// Sum of event size estimates.
    Bytes,
}

impl SizeUnit {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SizeUnit::Events => "events",
            SizeUnit::Duration => "seconds",
            SizeUnit::Bytes => "bytes",
        }
    }
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// What the runner does when a window fails for good.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and move on to the next window.
    #[default]
    Continue,
    /// Stop processing the remaining queue.
    FailFast,
}

/// How an oversized window is subdivided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPolicy {
    /// Two halves by the active size unit.
    #[default]
    Halve,
    /// `ceil(estimated / limit)` parts when the generator reports both numbers,
    /// halves otherwise.
    Proportional,
}

/// Windowing configuration consumed by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub size_unit: SizeUnit,
    /// Core size of each window, in `size_unit`.
    pub step_size: u64,
    /// Smallest final window the planner emits on its own, in `size_unit`.
    /// Also the floor below which the splitter refuses to cut.
    pub min_window_size: u64,
    pub overlap_ratio: f64,
    pub max_window_duration: Option<Duration>,
    pub range: Option<TimeRange>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            size_unit: SizeUnit::Events,
            step_size: 100,
            min_window_size: 10,
            overlap_ratio: 0.2,
            max_window_duration: None,
            range: None,
        }
    }
}

impl WindowConfig {
    #[must_use]
    pub fn new(size_unit: SizeUnit, step_size: u64) -> Self {
        Self {
            size_unit,
            step_size,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_min_window_size(mut self, min_window_size: u64) -> Self {
        self.min_window_size = min_window_size;
        self
    }

    #[must_use]
    pub fn with_overlap_ratio(mut self, overlap_ratio: f64) -> Self {
        self.overlap_ratio = overlap_ratio;
        self
    }

    #[must_use]
    pub fn with_max_window_duration(mut self, max: Duration) -> Self {
        self.max_window_duration = Some(max);
        self
    }

    #[must_use]
    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn validate(&self) -> Result<(), FatalConfigError> {
        if !(0.0..=MAX_OVERLAP_RATIO).contains(&self.overlap_ratio) {
            return Err(FatalConfigError::OverlapOutOfRange {
                ratio: self.overlap_ratio,
            });
        }
        if self.step_size == 0 {
            return Err(FatalConfigError::ZeroStepSize);
        }
        if self.min_window_size > self.step_size {
            return Err(FatalConfigError::MinWindowExceedsStep {
                min: self.min_window_size,
                step: self.step_size,
            });
        }
        Ok(())
    }

    /// Overlap carried into each window after the first, in `size_unit`.
    #[must_use]
    pub fn overlap_units(&self) -> u64 {
        (self.overlap_ratio * self.step_size as f64).round() as u64
    }
}
