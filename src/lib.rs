//! Client for asynchronous provider-validation jobs.
//!
//! An operator uploads a batch of provider records (out of scope here),
//! receives a job id, and this crate takes over:
//!
//! - [`JobPoller`] polls job status at a fixed cadence until a terminal
//!   state, with no push channel required
//! - [`ValidationTrigger`] moves a pending job into validation
//! - [`ResultReconciler`] fetches the raw result rows and joins each one with
//!   a provider-directory lookup under a bounded fan-out, falling back to
//!   fixed sentinels when a lookup fails
//! - [`CorrectionTrigger`] fires remediation and invalidates the cached
//!   reconciled set so the next read is fresh
//! - [`ResultView`] filters and paginates the reconciled rows locally
//!
//! All failures are scoped to a single job's view; nothing here is fatal to
//! the process.

pub mod client;
pub mod error;
pub mod poller;
pub mod reconcile;
pub mod scheduler;
pub mod trigger;
pub mod view;

pub use client::{JobRecord, JobStatus, MatchState, ProviderRecord, ResultRecord, ValidationApi};
pub use error::{AppError, ErrorPresentation};
pub use poller::{JobPoller, JobWatch, PollEvent, DEFAULT_POLL_INTERVAL};
pub use reconcile::{
    ReconcileCache, ReconciledResult, ResultReconciler, FALLBACK_NPI, FALLBACK_PROVIDER_NAME,
};
pub use scheduler::{LookupScheduler, DEFAULT_LOOKUP_LIMIT};
pub use trigger::{CorrectionTrigger, ValidationTrigger};
pub use view::{ResultView, DEFAULT_PAGE_SIZE};
