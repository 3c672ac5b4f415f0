//! Windows: contiguous, shared-storage slices of the event stream.

use std::fmt::Write as _;
use std::ops::Range;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{Event, SizeUnit};

/// An ordered slice of events processed as one unit.
///
/// All windows of a plan share one `Arc<[Event]>`; a window is the index range
/// into it. The first `overlap` events are context copied from the previous
/// window's core and are not part of this window's core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    index: u64,
    split_depth: u32,
    split_path: Vec<u32>,
    stream: Arc<[Event]>,
    range: Range<usize>,
    overlap: usize,
    unit: SizeUnit,
}

impl Window {
    /// A window produced directly by the planner (split depth 0).
    ///
    /// `overlap` is clamped to the length of `range`.
    #[must_use]
    pub fn planned(
        stream: Arc<[Event]>,
        range: Range<usize>,
        overlap: usize,
        index: u64,
        unit: SizeUnit,
    ) -> Self {
        let overlap = overlap.min(range.len());
        Self {
            index,
            split_depth: 0,
            split_path: Vec::new(),
            stream,
            range,
            overlap,
            unit,
        }
    }

    /// A sub-window of `self` covering `range` (absolute stream indices).
    ///
    /// Keeps the parent's index, adds one level of split depth, and records
    /// `ordinal` in the split path.
    #[must_use]
    pub fn child(&self, range: Range<usize>, overlap: usize, ordinal: u32) -> Self {
        debug_assert!(range.start >= self.range.start && range.end <= self.range.end);
        let mut split_path = self.split_path.clone();
        split_path.push(ordinal);
        Self {
            index: self.index,
            split_depth: self.split_depth + 1,
            split_path,
            stream: Arc::clone(&self.stream),
            overlap: overlap.min(range.len()),
            range,
            unit: self.unit,
        }
    }

    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    #[must_use]
    pub fn split_depth(&self) -> u32 {
        self.split_depth
    }

    #[must_use]
    pub fn split_path(&self) -> &[u32] {
        &self.split_path
    }

    #[must_use]
    pub fn unit(&self) -> SizeUnit {
        self.unit
    }

    /// Absolute range into the shared stream.
    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    #[must_use]
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Every event in the window, overlap included.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.stream[self.range.clone()]
    }

    /// The non-overlap portion.
    #[must_use]
    pub fn core(&self) -> &[Event] {
        &self.events()[self.overlap..]
    }

    /// Absolute range of the core.
    #[must_use]
    pub fn core_range(&self) -> Range<usize> {
        self.range.start + self.overlap..self.range.end
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.range.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    #[must_use]
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.events().first().map(|e| e.timestamp)
    }

    #[must_use]
    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.events().last().map(|e| e.timestamp)
    }

    /// Size of the whole window in its unit.
    #[must_use]
    pub fn size_metric(&self) -> u64 {
        measure(self.events(), self.unit)
    }

    /// Stable display name, e.g. `window-3` or `window-3.1.0` after two splits.
    #[must_use]
    pub fn label(&self) -> String {
        let mut label = format!("window-{}", self.index);
        for ordinal in &self.split_path {
            let _ = write!(label, ".{ordinal}");
        }
        label
    }
}

/// Measure a run of events in `unit`. Duration is whole seconds between the
/// first and last event.
#[must_use]
pub fn measure(events: &[Event], unit: SizeUnit) -> u64 {
    match unit {
        SizeUnit::Events => events.len() as u64,
        SizeUnit::Bytes => events.iter().map(|e| e.size_estimate).sum(),
        SizeUnit::Duration => match (events.first(), events.last()) {
            (Some(first), Some(last)) => {
                ((last.ordering_key() - first.ordering_key()).max(0) / 1000) as u64
            }
            _ => 0,
        },
    }
}
