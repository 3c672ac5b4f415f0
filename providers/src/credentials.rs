//! Credential rotation.
//!
//! A [`CredentialRotator`] owns a fixed set of credentials. Each one is a slot
//! that at most one worker holds at a time. [`CredentialRotator::acquire`]
//! waits (FIFO) for a free slot and returns a [`CredentialLease`]; the slot
//! goes back to the end of the free queue when the lease is released or
//! dropped, on every exit path including panics and cancelled futures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use quill_types::Credential;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RotatorError {
    #[error("credential rotator needs at least one credential")]
    NoCredentials,
    #[error("credential rotator is closed")]
    Closed,
}

/// Per-slot bookkeeping shared with outstanding leases.
struct Slots {
    credentials: Vec<Arc<Credential>>,
    free: Mutex<VecDeque<usize>>,
    acquisitions: Vec<AtomicU64>,
    checked_out: AtomicUsize,
    peak: AtomicUsize,
}

impl Slots {
    fn take(&self) -> Option<usize> {
        let slot = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()?;
        self.acquisitions[slot].fetch_add(1, Ordering::Relaxed);
        let now = self.checked_out.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        Some(slot)
    }

    fn give_back(&self, slot: usize) {
        self.checked_out.fetch_sub(1, Ordering::AcqRel);
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(slot);
    }
}

/// Bounded, exclusive assignment of credentials to concurrent workers.
///
/// Cheap to share behind an `Arc`; never a global.
pub struct CredentialRotator {
    permits: Arc<Semaphore>,
    slots: Arc<Slots>,
}

impl CredentialRotator {
    pub fn new(credentials: Vec<Credential>) -> Result<Self, RotatorError> {
        if credentials.is_empty() {
            return Err(RotatorError::NoCredentials);
        }
        let count = credentials.len();
        Ok(Self {
            permits: Arc::new(Semaphore::new(count)),
            slots: Arc::new(Slots {
                credentials: credentials.into_iter().map(Arc::new).collect(),
                free: Mutex::new((0..count).collect()),
                acquisitions: (0..count).map(|_| AtomicU64::new(0)).collect(),
                checked_out: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        })
    }

    /// Number of credentials, which is also the concurrency bound.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.credentials.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.credentials.is_empty()
    }

    /// Wait for a free slot and lease it.
    ///
    /// Waiters are served in arrival order.
    pub async fn acquire(&self) -> Result<CredentialLease, RotatorError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| RotatorError::Closed)?;
        // A permit guarantees a free slot: permits and free slots are
        // returned together in `CredentialLease::drop`.
        let slot = self.slots.take().ok_or(RotatorError::Closed)?;
        trace!(slot, label = self.slots.credentials[slot].label(), "Credential leased");
        Ok(CredentialLease {
            slot,
            credential: Arc::clone(&self.slots.credentials[slot]),
            slots: Arc::clone(&self.slots),
            _permit: permit,
        })
    }

    /// Stop handing out leases. Pending and future `acquire` calls fail with
    /// [`RotatorError::Closed`]; outstanding leases stay valid.
    pub fn close(&self) {
        self.permits.close();
    }

    #[must_use]
    pub fn stats(&self) -> RotatorStats {
        RotatorStats {
            acquisitions: self
                .slots
                .credentials
                .iter()
                .zip(&self.slots.acquisitions)
                .map(|(credential, count)| {
                    (credential.label().to_string(), count.load(Ordering::Relaxed))
                })
                .collect(),
            checked_out: self.slots.checked_out.load(Ordering::Acquire),
            peak_checked_out: self.slots.peak.load(Ordering::Acquire),
        }
    }
}

impl std::fmt::Debug for CredentialRotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRotator")
            .field("slots", &self.len())
            .field("available", &self.permits.available_permits())
            .finish()
    }
}

/// Usage counters, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotatorStats {
    /// `(label, times leased)` per slot, in construction order.
    pub acquisitions: Vec<(String, u64)>,
    pub checked_out: usize,
    pub peak_checked_out: usize,
}

/// Exclusive hold on one credential slot.
///
/// The credential can only be read through a live lease.
pub struct CredentialLease {
    slot: usize,
    credential: Arc<Credential>,
    slots: Arc<Slots>,
    _permit: OwnedSemaphorePermit,
}

impl CredentialLease {
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[must_use]
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Return the slot now. Equivalent to dropping the lease.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for CredentialLease {
    fn drop(&mut self) {
        // The slot is back in the queue before `_permit` drops and wakes a waiter.
        self.slots.give_back(self.slot);
        trace!(slot = self.slot, "Credential released");
    }
}

impl std::fmt::Debug for CredentialLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialLease")
            .field("slot", &self.slot)
            .field("credential", &self.credential)
            .finish()
    }
}
