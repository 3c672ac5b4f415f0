//! Delivery of per-window results.

use std::ops::Range;

use thiserror::Error;

use quill_types::{Fingerprint, RunId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("output sink rejected {label}: {message}")]
pub struct SinkError {
    pub label: String,
    pub message: String,
}

/// One successful window, in the order windows complete.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowResult<T> {
    pub window_index: u64,
    pub split_depth: u32,
    pub label: String,
    /// Absolute stream range of the window's core.
    pub core: Range<usize>,
    pub fingerprint: Fingerprint,
    pub run_id: RunId,
    pub output: T,
}

/// Receives results in window order. Called before the run is marked
/// completed, so a completed run always means a delivered result.
pub trait OutputSink<T> {
    fn emit(&mut self, result: WindowResult<T>) -> Result<(), SinkError>;
}

/// Keeps every result in memory.
#[derive(Debug)]
pub struct CollectingSink<T> {
    results: Vec<WindowResult<T>>,
}

impl<T> Default for CollectingSink<T> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
        }
    }
}

impl<T> CollectingSink<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn results(&self) -> &[WindowResult<T>] {
        &self.results
    }

    pub fn outputs(&self) -> impl Iterator<Item = &T> {
        self.results.iter().map(|r| &r.output)
    }

    #[must_use]
    pub fn into_results(self) -> Vec<WindowResult<T>> {
        self.results
    }
}

impl<T> OutputSink<T> for CollectingSink<T> {
    fn emit(&mut self, result: WindowResult<T>) -> Result<(), SinkError> {
        self.results.push(result);
        Ok(())
    }
}
