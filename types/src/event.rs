//! Conversational events as delivered by an event source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One conversational record.
///
/// Events are immutable once ingested. The `timestamp` is the ordering key;
/// `size_estimate` is what byte-based windowing and splitting measure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub text: String,
    pub size_estimate: u64,
}

impl Event {
    /// Build an event whose size estimate is the UTF-8 length of its text.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, author: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let size_estimate = text.len() as u64;
        Self {
            timestamp,
            author: author.into(),
            text,
            size_estimate,
        }
    }

    /// Millisecond ordering key, the unit all duration arithmetic is done in.
    #[must_use]
    pub fn ordering_key(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// Half-open `[start, end)` timestamp filter applied before windowing.
///
/// Either bound may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| at >= start) && self.end.is_none_or(|end| at < end)
    }
}
