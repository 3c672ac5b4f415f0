//! Credential-bounded concurrency for calls to rate-limited external services.
//!
//! # Architecture
//!
//! - [`CredentialRotator`] - fixed set of credentials, each leased to at most one worker at a time
//! - [`WorkerPool`] - fans sub-tasks out over the rotator, one lease per running sub-task
//! - [`retry`] - exponential backoff with down-jitter, shared with the window runner
//!
//! The rotator is the only way to reach a credential. It is an owned value,
//! shared through `Arc` and handed to the pool explicitly.

pub mod credentials;
pub mod pool;
pub mod retry;

pub use credentials::{CredentialLease, CredentialRotator, RotatorError, RotatorStats};
pub use pool::{PoolConfig, PoolRun, SubTaskError, SubTaskReport, WorkerPool};
pub use retry::{RetryConfig, calculate_retry_delay};

pub use quill_types;
