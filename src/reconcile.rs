//! Result reconciliation: joining raw result rows with provider-directory
//! lookups.
//!
//! For each result row holding a provider reference, one directory lookup is
//! issued. Lookups run concurrently under the [`LookupScheduler`] bound and
//! are joined with barrier semantics: the reconciled set is produced only
//! after every lookup has settled, in the original row order. A failed or
//! empty lookup degrades that row to fixed fallback values; it never reduces
//! the output count and never surfaces as a top-level error.
//!
//! Reconciled sets are cached per job id in an explicit, generation-tagged
//! cache. Correction triggers invalidate the entry; a reconciliation that was
//! in flight across an invalidation cannot re-publish stale rows.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::client::{ResultRecord, ValidationApi};
use crate::error::AppError;
use crate::scheduler::LookupScheduler;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Provider name shown when the directory lookup yields nothing.
pub const FALLBACK_PROVIDER_NAME: &str = "Unknown";

/// NPI shown when the directory lookup yields nothing.
pub const FALLBACK_NPI: &str = "N/A";

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// A result row enriched with denormalized provider data, ready for display.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciledResult {
    #[serde(flatten)]
    pub record: ResultRecord,
    pub provider_name: String,
    pub csv_npi: String,
}

impl ReconciledResult {
    /// True iff any field comparison on the underlying row is a mismatch.
    pub fn is_mismatch(&self) -> bool {
        self.record.is_mismatch()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ReconcileCache
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct CacheSlot {
    /// Monotonic generation for this job id. Bumped by `begin` and
    /// `invalidate`; a commit is accepted only if its generation is current.
    generation: u64,
    rows: Option<Arc<Vec<ReconciledResult>>>,
}

/// Explicit reconciled-result cache keyed by job id.
///
/// Readers always see the last committed value or a miss, never a torn state:
/// an in-flight reconciliation touches the cache only at `begin` and
/// `commit`.
///
/// Slots outlive invalidation: the generation counter must survive so that a
/// reconciliation in flight across an `invalidate` stays superseded. A slot
/// is therefore retained (rows dropped, counter kept) for every job id ever
/// reconciled, which is bounded by the jobs an operator touches in a
/// session. Row payloads, the expensive part, are freed on invalidation.
#[derive(Default)]
pub struct ReconcileCache {
    slots: Mutex<HashMap<String, CacheSlot>>,
}

impl ReconcileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached reconciled set for a job, if one is committed.
    pub fn get(&self, job_id: &str) -> Option<Arc<Vec<ReconciledResult>>> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(job_id).and_then(|slot| slot.rows.clone())
    }

    /// Registers the start of a reconciliation and returns its generation.
    /// Any previously started reconciliation for this job id is superseded.
    pub fn begin(&self, job_id: &str) -> u64 {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.entry(job_id.to_string()).or_default();
        slot.generation += 1;
        slot.generation
    }

    /// Commits a reconciled set. Returns false (and stores nothing) when the
    /// generation has been superseded by a newer `begin` or an `invalidate`.
    pub fn commit(
        &self,
        job_id: &str,
        generation: u64,
        rows: Arc<Vec<ReconciledResult>>,
    ) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        match slots.get_mut(job_id) {
            Some(slot) if slot.generation == generation => {
                slot.rows = Some(rows);
                true
            }
            _ => false,
        }
    }

    /// Drops the cached set for a job and supersedes any in-flight
    /// reconciliation, forcing the next read to fetch and reconcile afresh.
    pub fn invalidate(&self, job_id: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.entry(job_id.to_string()).or_default();
        slot.generation += 1;
        slot.rows = None;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ResultReconciler
// ─────────────────────────────────────────────────────────────────────────────

/// Produces display-ready result sets for completed jobs.
#[derive(Clone)]
pub struct ResultReconciler {
    api: ValidationApi,
    scheduler: LookupScheduler,
    cache: Arc<ReconcileCache>,
}

impl ResultReconciler {
    /// Creates a reconciler with the default lookup concurrency bound.
    pub fn new(api: ValidationApi) -> Self {
        Self {
            api,
            scheduler: LookupScheduler::default(),
            cache: Arc::new(ReconcileCache::new()),
        }
    }

    /// Overrides the lookup scheduler (e.g. to change the fan-out bound).
    pub fn with_scheduler(mut self, scheduler: LookupScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// The cache shared with correction triggers.
    pub fn cache(&self) -> Arc<ReconcileCache> {
        self.cache.clone()
    }

    /// Invalidates the cached set for a job.
    pub fn invalidate(&self, job_id: &str) {
        self.cache.invalidate(job_id);
    }

    /// Returns the reconciled result set for a completed job, serving from
    /// cache when possible.
    ///
    /// Only meaningful once the job has reached `Completed`. On a cache miss
    /// this fetches the raw rows and enriches them; the result is cached
    /// unless a newer reconciliation or an invalidation superseded this call
    /// while it was in flight.
    ///
    /// # Errors
    ///
    /// Propagates fetch failures. Individual lookup failures are absorbed
    /// into fallback values and never reported here.
    pub async fn reconcile(&self, job_id: &str) -> Result<Arc<Vec<ReconciledResult>>, AppError> {
        if let Some(rows) = self.cache.get(job_id) {
            info!("[RECON] serving job {} from cache", job_id);
            return Ok(rows);
        }

        let generation = self.cache.begin(job_id);
        let records = self.api.fetch_results(job_id).await?;
        let count = records.len();

        let rows = Arc::new(self.reconcile_records(records).await);
        debug_assert_eq!(rows.len(), count);

        if self.cache.commit(job_id, generation, rows.clone()) {
            info!("[RECON] cached {} reconciled rows for job {}", count, job_id);
        } else {
            info!("[RECON] reconciliation for job {} was superseded, not cached", job_id);
        }

        Ok(rows)
    }

    /// Enriches raw rows with provider data. Output has the same length and
    /// order as the input regardless of lookup outcomes.
    pub async fn reconcile_records(&self, records: Vec<ResultRecord>) -> Vec<ReconciledResult> {
        let lookups = records.into_iter().map(|record| {
            let api = self.api.clone();
            let scheduler = self.scheduler.clone();
            async move {
                let (provider_name, csv_npi) = match record.provider_id.as_deref() {
                    Some(provider_id) => {
                        let _permit = scheduler.acquire().await;
                        lookup_provider_fields(&api, provider_id).await
                    }
                    None => fallback_fields(),
                };
                ReconciledResult {
                    record,
                    provider_name,
                    csv_npi,
                }
            }
        });

        // Barrier join; join_all preserves input order.
        join_all(lookups).await
    }
}

/// Resolves the display fields for one provider reference, absorbing every
/// failure mode into the fallback values.
async fn lookup_provider_fields(api: &ValidationApi, provider_id: &str) -> (String, String) {
    match api.get_provider(provider_id).await {
        Ok(Some(provider)) => (
            provider
                .name
                .unwrap_or_else(|| FALLBACK_PROVIDER_NAME.to_string()),
            provider.npi.unwrap_or_else(|| FALLBACK_NPI.to_string()),
        ),
        Ok(None) => fallback_fields(),
        Err(err) => {
            warn!("[RECON] lookup failed for provider {}: {}", provider_id, err);
            fallback_fields()
        }
    }
}

fn fallback_fields() -> (String, String) {
    (FALLBACK_PROVIDER_NAME.to_string(), FALLBACK_NPI.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
