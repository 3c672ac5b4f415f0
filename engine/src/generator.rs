//! The external generation step, as seen by the runner.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use quill_providers::WorkerPool;
use quill_types::{RunId, Window};

use crate::splitter::SizeHint;

pub type GenerateFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, GenerateError>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerateError {
    /// The window is too large for the generator. Resolved by splitting,
    /// never by retrying at the same size.
    #[error("window too large (estimated {estimated:?}, limit {limit:?})")]
    SizeExceeded {
        estimated: Option<u64>,
        limit: Option<u64>,
    },
    /// Worth retrying the same window after a backoff.
    #[error("transient generator failure: {0}")]
    Transient(String),
    #[error("generator failed: {0}")]
    Failed(String),
}

impl GenerateError {
    /// Size failure without numbers; the splitter halves.
    #[must_use]
    pub fn size_exceeded() -> Self {
        GenerateError::SizeExceeded {
            estimated: None,
            limit: None,
        }
    }

    /// Size failure with the generator's estimate and limit, in tokens or
    /// whatever unit it counts in.
    #[must_use]
    pub fn size_exceeded_by(estimated: u64, limit: u64) -> Self {
        GenerateError::SizeExceeded {
            estimated: Some(estimated),
            limit: Some(limit),
        }
    }

    pub(crate) fn size_hint(&self) -> Option<SizeHint> {
        match self {
            GenerateError::SizeExceeded {
                estimated: Some(estimated),
                limit: Some(limit),
            } => Some(SizeHint {
                estimated: *estimated,
                limit: *limit,
            }),
            _ => None,
        }
    }
}

/// Per-attempt context handed to the generator.
///
/// The pool is the only route to credentials for sub-tasks.
#[derive(Debug, Clone, Copy)]
pub struct WindowContext<'a> {
    pub run_id: &'a RunId,
    /// 1-based attempt number for this window.
    pub attempt: u32,
    pub pool: Option<&'a WorkerPool>,
}

/// Turns one window into one output.
pub trait Generator: Send + Sync {
    type Output: Send;

    fn generate<'a>(&'a self, window: &'a Window, ctx: WindowContext<'a>)
    -> GenerateFut<'a, Self::Output>;
}
