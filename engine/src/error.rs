use std::time::Duration;

use thiserror::Error;

use crate::runner::RunSummary;
use crate::sink::SinkError;

/// Why a window ended in failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error(
        "window {window_index} still too large at split depth {depth} (max {max_depth})"
    )]
    SplitDepthExceeded {
        window_index: u64,
        depth: u32,
        max_depth: u32,
    },
    #[error("generator timed out after {after:?} ({attempts} attempt(s))")]
    TimedOut { after: Duration, attempts: u32 },
    #[error("transient failure persisted after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },
    #[error("{0}")]
    Generator(String),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[derive(Debug, Error)]
pub enum RunnerError {
    /// Stopped under the fail-fast policy. Windows finished before the
    /// failure stay recorded.
    #[error("run halted: {cause}")]
    Halted {
        cause: WindowError,
        summary: Box<RunSummary>,
    },
}
