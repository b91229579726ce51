//! One-shot job action triggers.
//!
//! Both triggers are fire-and-forget: no retry, no precondition
//! re-verification, no dedup token beyond a local per-job in-flight flag. The
//! server
//! is assumed idempotent for repeated accepted triggers. A correction
//! acknowledgment additionally invalidates the reconciler cache so the next
//! read re-fetches and re-reconciles.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::client::ValidationApi;
use crate::error::AppError;
use crate::reconcile::ReconcileCache;

// ─────────────────────────────────────────────────────────────────────────────
// In-flight Guard
// ─────────────────────────────────────────────────────────────────────────────

/// RAII guard over a trigger's in-flight job set. The flag is scoped per job
/// id: acquiring while that job already has a call outstanding fails locally
/// without a network call, while other jobs are unaffected. The id is
/// released on drop, including on the error path.
struct InFlightGuard {
    jobs: Arc<Mutex<HashSet<String>>>,
    job_id: String,
}

impl InFlightGuard {
    fn acquire(jobs: &Arc<Mutex<HashSet<String>>>, job_id: &str) -> Result<Self, AppError> {
        {
            let mut set = jobs.lock().unwrap_or_else(|e| e.into_inner());
            if !set.insert(job_id.to_string()) {
                return Err(AppError::TriggerInFlight);
            }
        }
        Ok(Self {
            jobs: jobs.clone(),
            job_id: job_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.job_id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ValidationTrigger
// ─────────────────────────────────────────────────────────────────────────────

/// Fires the action that moves a pending job into validation.
///
/// Valid only while the job is observed to be `Pending`; checking that
/// precondition is the caller's responsibility. On transport failure the
/// job's local state is untouched and polling reflects the server's
/// authoritative state regardless.
#[derive(Clone)]
pub struct ValidationTrigger {
    api: ValidationApi,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ValidationTrigger {
    pub fn new(api: ValidationApi) -> Self {
        Self {
            api,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Triggers validation for a job.
    ///
    /// # Errors
    ///
    /// - `AppError::TriggerInFlight` - a previous call for this job id is
    ///   still outstanding
    /// - transport/API errors from the underlying request
    pub async fn trigger(&self, job_id: &str) -> Result<(), AppError> {
        let _guard = InFlightGuard::acquire(&self.in_flight, job_id)?;
        self.api.trigger_validation(job_id).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CorrectionTrigger
// ─────────────────────────────────────────────────────────────────────────────

/// Fires the remediation action for a completed job.
///
/// On a 2xx acknowledgment the reconciler cache entry for the job is
/// invalidated unconditionally; the server's remediation work is asynchronous
/// and not tracked by a new status. On failure the cache is left intact.
#[derive(Clone)]
pub struct CorrectionTrigger {
    api: ValidationApi,
    cache: Arc<ReconcileCache>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl CorrectionTrigger {
    pub fn new(api: ValidationApi, cache: Arc<ReconcileCache>) -> Self {
        Self {
            api,
            cache,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Triggers correction for a job and invalidates its cached results.
    ///
    /// # Errors
    ///
    /// - `AppError::TriggerInFlight` - a previous call for this job id is
    ///   still outstanding
    /// - transport/API errors from the underlying request
    pub async fn trigger(&self, job_id: &str) -> Result<(), AppError> {
        let _guard = InFlightGuard::acquire(&self.in_flight, job_id)?;
        self.api.trigger_correction(job_id).await?;

        info!("[JOBS] correction accepted for job {}, invalidating cache", job_id);
        self.cache.invalidate(job_id);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
