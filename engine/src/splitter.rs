//! Subdivision of oversized windows.
//!
//! A split is pure: the parent window is left untouched and the children are
//! new windows over the same shared stream. Children partition the parent's
//! events exactly and in order, each strictly smaller than the parent.

use std::ops::Range;

use thiserror::Error;

use quill_types::{Event, SizeUnit, SplitPolicy, Window, measure};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("window of {events} event(s) cannot be split")]
    TooFewEvents { events: usize },
    #[error("split part of {size} {unit} would fall below the minimum of {min}")]
    BelowMinimum { size: u64, min: u64, unit: SizeUnit },
}

/// What the generator reported when it refused a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeHint {
    pub estimated: u64,
    pub limit: u64,
}

impl SizeHint {
    /// Parts needed to bring each piece under the limit, at least two.
    #[must_use]
    pub fn parts(&self) -> usize {
        if self.limit == 0 {
            return 2;
        }
        usize::try_from(self.estimated.div_ceil(self.limit))
            .unwrap_or(usize::MAX)
            .max(2)
    }
}

/// Split `window` into sub-windows one split level deeper.
///
/// Only the core is cut. The first child keeps the parent's leading overlap
/// in front of its own core; no new overlap is introduced between children.
/// For count and byte windows no child core may measure below
/// `min_window_size`.
pub fn split(
    window: &Window,
    policy: SplitPolicy,
    hint: Option<SizeHint>,
    min_window_size: u64,
) -> Result<Vec<Window>, SplitError> {
    let parts = match (policy, hint) {
        (SplitPolicy::Proportional, Some(hint)) => hint.parts(),
        _ => 2,
    };
    split_into(window, parts, min_window_size)
}

/// Split `window` into `parts` children, at least two and at most one per core
/// event.
///
/// Used directly when the part count is already known, as when replaying a
/// split recorded by an earlier process.
pub fn split_into(
    window: &Window,
    parts: usize,
    min_window_size: u64,
) -> Result<Vec<Window>, SplitError> {
    let core = window.core();
    let len = core.len();
    if len < 2 {
        return Err(SplitError::TooFewEvents { events: len });
    }
    let parts = parts.clamp(2, len);

    let bounds = match window.unit() {
        SizeUnit::Events => count_bounds(len, parts),
        SizeUnit::Bytes => byte_bounds(core, parts),
        SizeUnit::Duration => time_bounds(core, parts).unwrap_or_else(|| count_bounds(len, parts)),
    };

    if window.unit() != SizeUnit::Duration {
        for part in &bounds {
            let size = measure(&core[part.clone()], window.unit());
            if size < min_window_size {
                return Err(SplitError::BelowMinimum {
                    size,
                    min: min_window_size,
                    unit: window.unit(),
                });
            }
        }
    }

    let base = window.core_range().start;
    Ok(bounds
        .into_iter()
        .enumerate()
        .map(|(ordinal, part)| {
            let ordinal = u32::try_from(ordinal).unwrap_or(u32::MAX);
            if ordinal == 0 {
                window.child(window.range().start..base + part.end, window.overlap(), ordinal)
            } else {
                window.child(base + part.start..base + part.end, 0, ordinal)
            }
        })
        .collect())
}

/// Turn interior cut points into consecutive ranges over `0..len`.
fn ranges_from_cuts(cuts: &[usize], len: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for &cut in cuts {
        ranges.push(start..cut);
        start = cut;
    }
    ranges.push(start..len);
    ranges
}

/// Near-equal event counts; earlier parts take the remainder.
fn count_bounds(len: usize, parts: usize) -> Vec<Range<usize>> {
    let cuts: Vec<usize> = (1..parts).map(|i| (i * len).div_ceil(parts)).collect();
    ranges_from_cuts(&cuts, len)
}

/// Cut where the running byte total crosses each equal share, keeping every
/// part non-empty.
fn byte_bounds(events: &[Event], parts: usize) -> Vec<Range<usize>> {
    let len = events.len();
    let mut prefix = Vec::with_capacity(len);
    let mut total = 0_u64;
    for event in events {
        total += event.size_estimate;
        prefix.push(total);
    }

    let mut cuts = Vec::with_capacity(parts - 1);
    let mut previous = 0;
    for i in 1..parts {
        let target = (total as u128 * i as u128 / parts as u128) as u64;
        // Index just past the event that reaches the target share.
        let reached = prefix.partition_point(|&sum| sum < target) + 1;
        let lowest = previous + 1;
        let highest = len - (parts - i);
        let cut = reached.clamp(lowest, highest);
        cuts.push(cut);
        previous = cut;
    }
    ranges_from_cuts(&cuts, len)
}

/// Equal time slices. `None` when a slice would be empty.
fn time_bounds(events: &[Event], parts: usize) -> Option<Vec<Range<usize>>> {
    let first = events.first()?.ordering_key();
    let last = events.last()?.ordering_key();
    let span = i128::from(last - first);
    if span <= 0 {
        return None;
    }

    let mut cuts = Vec::with_capacity(parts - 1);
    let mut previous = 0;
    for i in 1..parts {
        let boundary = first + (span * i as i128 / parts as i128) as i64;
        let cut = events.partition_point(|event| event.ordering_key() <= boundary);
        if cut <= previous || cut >= events.len() {
            return None;
        }
        cuts.push(cut);
        previous = cut;
    }
    Some(ranges_from_cuts(&cuts, events.len()))
}
