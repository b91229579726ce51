//! Concurrency limiter for provider-directory lookups.
//!
//! Reconciliation fans out one lookup per result row. An unbounded fan-out
//! can overwhelm the directory service on large jobs, so every lookup must
//! hold a permit from this scheduler. Default limit is 8 concurrent lookups.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default number of concurrent directory lookups.
pub const DEFAULT_LOOKUP_LIMIT: usize = 8;

// ─────────────────────────────────────────────────────────────────────────────
// LookupScheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Scheduler that limits the number of concurrent directory lookups.
///
/// Permits are automatically released when dropped, so a lookup that fails or
/// is cancelled always frees its slot.
#[derive(Clone)]
pub struct LookupScheduler {
    sem: Arc<Semaphore>,
    max: usize,
}

impl Default for LookupScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKUP_LIMIT)
    }
}

impl LookupScheduler {
    /// Creates a new scheduler allowing up to `max_concurrent` lookups.
    ///
    /// # Panics
    ///
    /// Panics if `max_concurrent` is 0.
    pub fn new(max_concurrent: usize) -> Self {
        assert!(max_concurrent > 0, "max_concurrent must be greater than 0");

        Self {
            sem: Arc::new(Semaphore::new(max_concurrent)),
            max: max_concurrent,
        }
    }

    /// Acquires a permit, waiting if all slots are currently in use.
    pub async fn acquire(&self) -> LookupPermit {
        // The semaphore is never closed, so acquire_owned cannot fail
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore closed unexpectedly");

        LookupPermit { _permit: permit }
    }

    /// Returns the number of lookups currently in flight.
    pub fn active_lookups(&self) -> usize {
        self.max - self.sem.available_permits()
    }

    /// Returns the configured concurrency limit.
    pub fn limit(&self) -> usize {
        self.max
    }
}

/// A permit representing one in-flight lookup slot. Released on drop.
pub struct LookupPermit {
    _permit: OwnedSemaphorePermit,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
