//! Core domain types for Quill.
//!
//! Pure data: events, windows, identifiers, credentials and the validated
//! windowing configuration. No IO, no async.

mod config;
mod credential;
mod event;
mod ids;
mod window;

pub use config::{
    FailurePolicy, FatalConfigError, MAX_OVERLAP_RATIO, SizeUnit, SplitPolicy, WindowConfig,
};
pub use credential::Credential;
pub use event::{Event, TimeRange};
pub use ids::{ConfigDigest, Fingerprint, RunId};
pub use window::{Window, measure};
