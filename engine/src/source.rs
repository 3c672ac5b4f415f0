//! Event sources.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use quill_types::{Event, TimeRange};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read events from {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}:{line}: invalid event: {source}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Supplies the ordered event stream. Sources may pre-filter by `range`; the
/// planner filters again either way.
pub trait EventSource {
    fn load(&self, range: Option<TimeRange>) -> Result<Vec<Event>, SourceError>;
}

impl EventSource for Vec<Event> {
    fn load(&self, range: Option<TimeRange>) -> Result<Vec<Event>, SourceError> {
        Ok(self
            .iter()
            .filter(|event| range.is_none_or(|range| range.contains(event.timestamp)))
            .cloned()
            .collect())
    }
}

/// One JSON event per line: `{"timestamp": "...", "author": "...", "text": "..."}`.
///
/// `size_estimate` may be omitted and defaults to the UTF-8 length of `text`.
/// Blank lines are ignored.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    path: PathBuf,
}

#[derive(serde::Deserialize)]
struct RawEvent {
    timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    author: String,
    text: String,
    size_estimate: Option<u64>,
}

impl JsonLinesSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSource for JsonLinesSource {
    fn load(&self, range: Option<TimeRange>) -> Result<Vec<Event>, SourceError> {
        let io_error = |source| SourceError::Io {
            path: self.path.clone(),
            source,
        };
        let file = std::fs::File::open(&self.path).map_err(io_error)?;

        let mut events = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(io_error)?;
            if line.trim().is_empty() {
                continue;
            }
            let raw: RawEvent = serde_json::from_str(&line).map_err(|source| SourceError::Parse {
                path: self.path.clone(),
                line: idx + 1,
                source,
            })?;
            let mut event = Event::new(raw.timestamp, raw.author, raw.text);
            if let Some(size) = raw.size_estimate {
                event.size_estimate = size;
            }
            if range.is_none_or(|range| range.contains(event.timestamp)) {
                events.push(event);
            }
        }
        debug!(path = %self.path.display(), events = events.len(), "Loaded events");
        Ok(events)
    }
}
