//! Window planning.
//!
//! The planner filters and orders the event stream once, then hands out a
//! lazy [`WindowPlan`] iterator. Window cores partition the filtered stream;
//! every window after the first also carries a trailing slice of the previous
//! core as context.

use std::ops::Range;
use std::sync::Arc;

use tracing::{debug, warn};

use quill_types::{Event, FatalConfigError, SizeUnit, Window, WindowConfig, measure};

const MILLIS_PER_SECOND: i64 = 1000;

/// Plans windows over one ordered, filtered event stream.
#[derive(Debug, Clone)]
pub struct WindowPlanner {
    stream: Arc<[Event]>,
    config: WindowConfig,
    step: u64,
}

impl WindowPlanner {
    /// Validate `config`, apply its range filter and sort by timestamp.
    ///
    /// Sorting is stable, so events sharing a timestamp keep their input order.
    pub fn new(events: Vec<Event>, config: WindowConfig) -> Result<Self, FatalConfigError> {
        config.validate()?;

        let mut events = events;
        if let Some(range) = &config.range {
            events.retain(|event| range.contains(event.timestamp));
        }
        events.sort_by_key(Event::ordering_key);

        let step = effective_step(&config);
        debug!(
            events = events.len(),
            unit = %config.size_unit,
            step,
            "Planned event stream"
        );

        Ok(Self {
            stream: events.into(),
            config,
            step,
        })
    }

    /// Events left after filtering, in window order.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.stream
    }

    #[must_use]
    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Step actually used, after any reduction for `max_window_duration`.
    #[must_use]
    pub fn effective_step(&self) -> u64 {
        self.step
    }

    /// Start (or restart) the plan from the first window.
    #[must_use]
    pub fn windows(&self) -> WindowPlan {
        let overlap = (self.config.overlap_ratio * self.step as f64).round() as u64;
        WindowPlan {
            stream: Arc::clone(&self.stream),
            unit: self.config.size_unit,
            step: self.step,
            overlap,
            min_window_size: self.config.min_window_size,
            cursor: 0,
            index: 0,
            previous: None,
            lookahead: None,
        }
    }
}

fn effective_step(config: &WindowConfig) -> u64 {
    let Some(max) = config.max_window_duration else {
        return config.step_size;
    };
    if config.size_unit != SizeUnit::Duration {
        warn!(
            unit = %config.size_unit,
            max_window_secs = max.as_secs(),
            "max_window_duration is not enforced for non-duration windows"
        );
        return config.step_size;
    }

    let max_secs = max.as_secs_f64();
    let overlapped_span = config.step_size as f64 * (1.0 + config.overlap_ratio);
    if overlapped_span <= max_secs {
        return config.step_size;
    }
    let reduced = ((max_secs / (1.0 + config.overlap_ratio)).floor() as u64).max(1);
    warn!(
        requested = config.step_size,
        reduced,
        max_window_secs = max.as_secs(),
        "Reduced window step to respect max_window_duration"
    );
    reduced
}

/// One window's core: the events it owns outright.
#[derive(Debug, Clone)]
struct Core {
    range: Range<usize>,
    /// Exclusive end of the grid interval, for duration windows.
    grid_end_ms: Option<i64>,
}

/// Lazy iterator over planned windows, in stream order.
#[derive(Debug, Clone)]
pub struct WindowPlan {
    stream: Arc<[Event]>,
    unit: SizeUnit,
    step: u64,
    overlap: u64,
    min_window_size: u64,
    cursor: usize,
    index: u64,
    previous: Option<Core>,
    lookahead: Option<Core>,
}

impl WindowPlan {
    fn core_at(&self, start: usize) -> Option<Core> {
        let events = &self.stream;
        if start >= events.len() {
            return None;
        }
        let core = match self.unit {
            SizeUnit::Events => {
                let step = usize::try_from(self.step).unwrap_or(usize::MAX);
                Core {
                    range: start..start.saturating_add(step).min(events.len()),
                    grid_end_ms: None,
                }
            }
            SizeUnit::Bytes => {
                let mut end = start + 1;
                let mut total = events[start].size_estimate;
                while let Some(next) = events.get(end)
                    && total + next.size_estimate <= self.step
                {
                    total += next.size_estimate;
                    end += 1;
                }
                Core {
                    range: start..end,
                    grid_end_ms: None,
                }
            }
            SizeUnit::Duration => {
                let origin = events[0].ordering_key();
                let step_ms = i64::try_from(self.step)
                    .unwrap_or(i64::MAX)
                    .saturating_mul(MILLIS_PER_SECOND);
                let slot = (events[start].ordering_key() - origin).div_euclid(step_ms);
                let grid_end = origin.saturating_add(step_ms.saturating_mul(slot + 1));
                let end = start
                    + events[start..].partition_point(|event| event.ordering_key() < grid_end);
                Core {
                    range: start..end,
                    grid_end_ms: Some(grid_end),
                }
            }
        };
        Some(core)
    }

    /// Number of trailing events of `previous` carried into the next window.
    fn overlap_from(&self, previous: &Core) -> usize {
        if self.overlap == 0 {
            return 0;
        }
        let prev = &self.stream[previous.range.clone()];
        match self.unit {
            SizeUnit::Events => prev.len().min(usize::try_from(self.overlap).unwrap_or(usize::MAX)),
            SizeUnit::Bytes => {
                let mut total = 0;
                prev.iter()
                    .rev()
                    .take_while(|event| {
                        total += event.size_estimate;
                        total <= self.overlap
                    })
                    .count()
            }
            SizeUnit::Duration => {
                let Some(grid_end) = previous.grid_end_ms else {
                    return 0;
                };
                let overlap_ms = i64::try_from(self.overlap)
                    .unwrap_or(i64::MAX)
                    .saturating_mul(MILLIS_PER_SECOND);
                let cutoff = grid_end.saturating_sub(overlap_ms);
                prev.len() - prev.partition_point(|event| event.ordering_key() < cutoff)
            }
        }
    }
}

impl Iterator for WindowPlan {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        let mut core = match self.lookahead.take() {
            Some(core) => core,
            None => self.core_at(self.cursor)?,
        };

        // Fold an undersized final core into this one.
        if let Some(next) = self.core_at(core.range.end) {
            let is_last = next.range.end == self.stream.len();
            if is_last && measure(&self.stream[next.range.clone()], self.unit) < self.min_window_size
            {
                debug!(
                    window_index = self.index,
                    merged_events = next.range.len(),
                    "Merged undersized final window into previous"
                );
                core.range.end = next.range.end;
                core.grid_end_ms = next.grid_end_ms;
            } else {
                self.lookahead = Some(next);
            }
        }

        let overlap = self
            .previous
            .as_ref()
            .map_or(0, |previous| self.overlap_from(previous));
        let window = Window::planned(
            Arc::clone(&self.stream),
            core.range.start - overlap..core.range.end,
            overlap,
            self.index,
            self.unit,
        );

        self.cursor = core.range.end;
        self.index += 1;
        self.previous = Some(core);
        Some(window)
    }
}

impl std::iter::FusedIterator for WindowPlan {}
