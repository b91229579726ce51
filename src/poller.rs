//! Fixed-interval polling of job status until a terminal state.
//!
//! The service offers no push channel, so job progress is observed by
//! polling. The poller:
//!
//! - Issues at most one in-flight status request per job; ticks that elapse
//!   while a request is outstanding are skipped, not queued
//! - Surfaces transport failures as transient events without stopping
//! - Stops scheduling only on an explicit terminal status
//! - Cancels cleanly when the watch is dropped, discarding any in-flight
//!   response

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::client::{JobRecord, ValidationApi};
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Default polling cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Capacity of the event channel between the polling task and the watch.
const EVENT_CHANNEL_CAPACITY: usize = 16;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// An observation produced by the polling loop.
#[derive(Debug)]
pub enum PollEvent {
    /// A successfully fetched, normalized job record.
    Update(JobRecord),
    /// A transport or server failure. Polling continues; the next tick will
    /// retry against the server's authoritative state.
    TransientError(AppError),
}

// ─────────────────────────────────────────────────────────────────────────────
// JobPoller
// ─────────────────────────────────────────────────────────────────────────────

/// Drives job-status polling and hands out per-job watches.
///
/// At most one watch may be active per job id at a time; a second `observe`
/// call for the same id fails with [`AppError::PollerActive`] until the first
/// watch is dropped.
#[derive(Clone)]
pub struct JobPoller {
    api: ValidationApi,
    interval: Duration,
    active: Arc<Mutex<HashSet<String>>>,
}

impl JobPoller {
    /// Creates a poller with the default 2-second cadence.
    pub fn new(api: ValidationApi) -> Self {
        Self {
            api,
            interval: DEFAULT_POLL_INTERVAL,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Overrides the polling cadence.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Starts observing a job and returns a watch over its status events.
    ///
    /// The first status request is issued immediately; subsequent requests
    /// follow the configured cadence. The watch yields events until a
    /// terminal status (`Completed` or `Failed`) has been delivered, then
    /// closes.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::PollerActive`] if a watch for this job id already
    /// exists.
    pub fn observe(&self, job_id: &str) -> Result<JobWatch, AppError> {
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if !active.insert(job_id.to_string()) {
                return Err(AppError::PollerActive {
                    job_id: job_id.to_string(),
                });
            }
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let api = self.api.clone();
        let interval = self.interval;
        let active = self.active.clone();
        let id = job_id.to_string();

        info!("[POLL] starting watch for job {}", id);

        let handle = tokio::spawn(async move {
            poll_loop(api, &id, interval, tx).await;
            active.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
        });

        Ok(JobWatch {
            rx,
            handle,
            job_id: job_id.to_string(),
            active: self.active.clone(),
        })
    }
}

/// The polling loop body. Runs until a terminal status is delivered or the
/// watch side of the channel is dropped.
async fn poll_loop(
    api: ValidationApi,
    job_id: &str,
    interval: Duration,
    tx: mpsc::Sender<PollEvent>,
) {
    let mut ticker = tokio::time::interval(interval);
    // One in-flight request at a time: ticks that pass while a request is
    // outstanding are dropped instead of being replayed in a burst.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        match api.get_job_status(job_id).await {
            Ok(record) => {
                let terminal = record.status.is_terminal();
                if tx.send(PollEvent::Update(record)).await.is_err() {
                    break;
                }
                if terminal {
                    info!("[POLL] job {} reached terminal status, stopping", job_id);
                    break;
                }
            }
            Err(err) => {
                warn!("[POLL] transient error for job {}: {}", job_id, err);
                if tx.send(PollEvent::TransientError(err)).await.is_err() {
                    break;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JobWatch
// ─────────────────────────────────────────────────────────────────────────────

/// A handle to an active polling loop for one job.
///
/// Dropping the watch aborts the loop, discards any in-flight response, and
/// releases the job id for future observation.
#[derive(Debug)]
pub struct JobWatch {
    rx: mpsc::Receiver<PollEvent>,
    handle: JoinHandle<()>,
    job_id: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl JobWatch {
    /// Receives the next poll event. Returns `None` once a terminal status
    /// has been delivered and the loop has stopped.
    pub async fn recv(&mut self) -> Option<PollEvent> {
        self.rx.recv().await
    }

    /// Drains events until a terminal status arrives and returns that record.
    ///
    /// Transient errors are skipped; returns `None` only if the loop ends
    /// without delivering a terminal record (it does not under normal
    /// operation).
    pub async fn wait_terminal(&mut self) -> Option<JobRecord> {
        while let Some(event) = self.recv().await {
            if let PollEvent::Update(record) = event {
                if record.status.is_terminal() {
                    return Some(record);
                }
            }
        }
        None
    }

    /// The job id this watch observes.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Drop for JobWatch {
    fn drop(&mut self) {
        self.handle.abort();
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.job_id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::JobStatus;
    use reqwest::Client;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_poller(mock_url: &str, interval_ms: u64) -> JobPoller {
        let api = ValidationApi::new(
            Arc::new(Client::new()),
            Url::parse(mock_url).unwrap(),
        );
        JobPoller::new(api).with_interval(Duration::from_millis(interval_ms))
    }

    fn job_body(status: &str, completed: u64, total: u64) -> serde_json::Value {
        serde_json::json!({
            "id": "abc123",
            "status": status,
            "completed_count": completed,
            "total_count": total
        })
    }

    #[tokio::test]
    async fn polls_through_lifecycle_and_stops_on_completed() {
        let mock_server = MockServer::start().await;

        // Mocks match in mount order; the one-shot pending and processing
        // responses run out before the completed fallback.
        Mock::given(method("GET"))
            .and(path("/jobs/abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_body("pending", 0, 10)))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/jobs/abc123"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(job_body("processing", 4, 10)),
            )
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/jobs/abc123"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(job_body("completed", 10, 10)),
            )
            .mount(&mock_server)
            .await;

        let poller = test_poller(&mock_server.uri(), 20);
        let mut watch = poller.observe("abc123").unwrap();

        let mut statuses = Vec::new();
        while let Some(event) = watch.recv().await {
            match event {
                PollEvent::Update(record) => statuses.push((record.status, record.progress_percent())),
                PollEvent::TransientError(e) => panic!("Unexpected transient error: {:?}", e),
            }
        }

        assert_eq!(
            statuses.iter().map(|(s, _)| *s).collect::<Vec<_>>(),
            vec![JobStatus::Pending, JobStatus::Processing, JobStatus::Completed]
        );
        // Completed job reports full progress
        assert_eq!(statuses.last().unwrap().1, 100.0);
    }

    #[tokio::test]
    async fn no_requests_after_terminal_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/jobs/abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_body("failed", 2, 10)))
            .mount(&mock_server)
            .await;

        let poller = test_poller(&mock_server.uri(), 20);
        let mut watch = poller.observe("abc123").unwrap();

        let record = watch.wait_terminal().await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);

        // Let several would-be ticks pass, then confirm polling stopped.
        tokio::time::sleep(Duration::from_millis(120)).await;
        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1, "No status requests may follow a terminal state");
    }

    #[tokio::test]
    async fn transient_error_does_not_stop_polling() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/jobs/abc123"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/jobs/abc123"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(job_body("completed", 10, 10)),
            )
            .mount(&mock_server)
            .await;

        let poller = test_poller(&mock_server.uri(), 20);
        let mut watch = poller.observe("abc123").unwrap();

        let first = watch.recv().await.unwrap();
        assert!(matches!(first, PollEvent::TransientError(_)));

        // The loop keeps scheduling and picks up the terminal status.
        let record = watch.wait_terminal().await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn slow_responses_skip_ticks_instead_of_queueing() {
        let mock_server = MockServer::start().await;

        // Each status request takes three poll intervals to answer. With one
        // request in flight at a time and skipped (not queued) ticks, the
        // request count is bounded by elapsed / delay, not elapsed / interval.
        Mock::given(method("GET"))
            .and(path("/jobs/abc123"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(job_body("pending", 0, 10))
                    .set_delay(Duration::from_millis(60)),
            )
            .mount(&mock_server)
            .await;

        let poller = test_poller(&mock_server.uri(), 20);
        let watch = poller.observe("abc123").unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(watch);

        // Allow any request that was already on the wire to land.
        tokio::time::sleep(Duration::from_millis(80)).await;
        let requests = mock_server.received_requests().await.unwrap().len();

        // Serialized 60ms round trips fit at most 5 times into 300ms; a
        // request-per-tick model would have issued ~15.
        assert!(
            (2..=6).contains(&requests),
            "Expected serialized polling (2..=6 requests), got {}",
            requests
        );
    }

    #[tokio::test]
    async fn duplicate_observe_is_rejected_until_drop() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/jobs/abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_body("pending", 0, 10)))
            .mount(&mock_server)
            .await;

        let poller = test_poller(&mock_server.uri(), 20);
        let watch = poller.observe("abc123").unwrap();

        let err = poller.observe("abc123").unwrap_err();
        assert!(matches!(err, AppError::PollerActive { .. }));

        // A different job id is unaffected.
        let other = poller.observe("def456");
        assert!(other.is_ok());

        drop(watch);
        assert!(poller.observe("abc123").is_ok());
    }

    #[tokio::test]
    async fn dropping_watch_cancels_polling() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/jobs/abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_body("pending", 0, 10)))
            .mount(&mock_server)
            .await;

        let poller = test_poller(&mock_server.uri(), 20);
        let mut watch = poller.observe("abc123").unwrap();

        // Wait for at least one update so the loop is known to be running.
        assert!(matches!(watch.recv().await, Some(PollEvent::Update(_))));
        drop(watch);

        // Allow any request that was already on the wire to land.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let before = mock_server.received_requests().await.unwrap().len();
        tokio::time::sleep(Duration::from_millis(120)).await;
        let after = mock_server.received_requests().await.unwrap().len();

        assert_eq!(before, after, "No ticks may fire after the watch is dropped");
    }
}
