//! HTTP client for the provider-validation service.
//!
//! This module provides the typed API surface the rest of the crate is built
//! on:
//!
//! - Job status retrieval with response normalization (bare record or array)
//! - One-shot validation/correction triggers
//! - Result and provider-directory fetches
//! - Error-body parsing into `AppError`
//!
//! Only HTTP method, path, and status codes are logged.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;
use url::Url;

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a validation job.
///
/// The server emits lowercase strings and uses `"running"` as a synonym for
/// `"processing"`. Unrecognized states map to `Unknown` and are treated as
/// non-terminal so polling survives server-side additions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    #[serde(alias = "running")]
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// True for states from which no further transition occurs.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A validation job as observed via polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Opaque job identifier.
    pub id: String,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Number of records validated so far.
    #[serde(default)]
    pub completed_count: u64,
    /// Total number of records in the job.
    #[serde(default)]
    pub total_count: u64,
}

impl JobRecord {
    /// Clamps `completed_count` to `total_count` so the progress invariant
    /// holds even against a misbehaving server.
    fn normalized(mut self) -> Self {
        self.completed_count = self.completed_count.min(self.total_count);
        self
    }

    /// Progress in percent. Zero when the job has no records.
    pub fn progress_percent(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            self.completed_count as f64 / self.total_count as f64 * 100.0
        }
    }
}

/// Outcome of a single field comparison.
///
/// The wire format is a nullable boolean: `true` is a match, `false` a
/// mismatch, and `null`/absent means the check could not be performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum MatchState {
    Match,
    Mismatch,
    #[default]
    Unknown,
}

impl From<Option<bool>> for MatchState {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => MatchState::Match,
            Some(false) => MatchState::Mismatch,
            None => MatchState::Unknown,
        }
    }
}

impl From<MatchState> for Option<bool> {
    fn from(value: MatchState) -> Self {
        match value {
            MatchState::Match => Some(true),
            MatchState::Mismatch => Some(false),
            MatchState::Unknown => None,
        }
    }
}

/// A raw validation result row for one uploaded record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: String,
    /// Reference into the provider directory, if the record was matched.
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub name_match: MatchState,
    #[serde(default)]
    pub phone_match: MatchState,
    #[serde(default)]
    pub address_match: MatchState,
    /// Per-check confidence scores in `[0, 1]`.
    #[serde(default, deserialize_with = "null_to_default")]
    pub confidence_scores: HashMap<String, f64>,
}

impl ResultRecord {
    /// True iff any field comparison is exactly a mismatch.
    /// `Unknown` does not count as a mismatch.
    pub fn is_mismatch(&self) -> bool {
        self.name_match == MatchState::Mismatch
            || self.phone_match == MatchState::Mismatch
            || self.address_match == MatchState::Mismatch
    }

    /// Highest confidence score across all checks, `None` when empty.
    pub fn max_confidence(&self) -> Option<f64> {
        self.confidence_scores
            .values()
            .copied()
            .fold(None, |acc, v| match acc {
                Some(max) if max >= v => Some(max),
                _ => Some(v),
            })
    }
}

/// A provider row from the directory service. Directory rows are sparse, so
/// everything beyond the identifier is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub npi: Option<String>,
    #[serde(default)]
    pub enumeration_type: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Job status responses arrive either as a bare record or a non-empty array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JobStatusResponse {
    One(JobRecord),
    Many(Vec<JobRecord>),
}

/// Provider lookups arrive wrapped; `provider` is null for unknown ids.
#[derive(Debug, Deserialize)]
struct ProviderLookupResponse {
    #[serde(default)]
    provider: Option<ProviderRecord>,
}

/// Error body emitted by the validation service.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    detail: String,
}

/// Deserializes an explicit JSON `null` as the type's default value.
fn null_to_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ─────────────────────────────────────────────────────────────────────────────
// ValidationApi
// ─────────────────────────────────────────────────────────────────────────────

/// Client for the provider-validation service endpoints.
#[derive(Clone)]
pub struct ValidationApi {
    /// Shared HTTP client.
    client: Arc<Client>,
    /// Base service URL.
    base_url: Url,
}

impl ValidationApi {
    /// Creates a new API client.
    pub fn new(client: Arc<Client>, base_url: Url) -> Self {
        Self { client, base_url }
    }

    /// Fetches the current status of a job, normalizing the response shape.
    ///
    /// The server may return either a single record or a non-empty array of
    /// records; in the array case the first element is taken. An empty array
    /// is treated as the job not existing.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` - the job does not exist
    /// - `AppError::ConnectionFailed` - network error
    /// - `AppError::ApiError` - non-2xx response
    pub async fn get_job_status(&self, job_id: &str) -> Result<JobRecord, AppError> {
        let url = self.build_url(&format!("/jobs/{}", job_id))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("Job status request failed: {}", e)))?;

        let status = response.status();
        info!("[JOBS] GET /jobs/{} -> {}", job_id, status.as_u16());

        if !status.is_success() {
            return Err(parse_error_response(response, status, &format!("Job {}", job_id)).await);
        }

        let body: JobStatusResponse = response.json().await.map_err(|e| {
            AppError::ApiError {
                status: status.as_u16(),
                message: format!("Failed to parse job status response: {}", e),
            }
        })?;

        let record = match body {
            JobStatusResponse::One(record) => record,
            JobStatusResponse::Many(records) => records
                .into_iter()
                .next()
                .ok_or_else(|| AppError::NotFound(format!("Job {}", job_id)))?,
        };

        Ok(record.normalized())
    }

    /// Fires the validation trigger for a job.
    ///
    /// Meaningful only while the job is pending; the precondition is the
    /// caller's responsibility and is not re-verified here.
    pub async fn trigger_validation(&self, job_id: &str) -> Result<(), AppError> {
        self.post_trigger(job_id, "validate").await
    }

    /// Fires the correction trigger for a job. The server's remediation work
    /// is asynchronous; a 2xx only acknowledges acceptance.
    pub async fn trigger_correction(&self, job_id: &str) -> Result<(), AppError> {
        self.post_trigger(job_id, "correct").await
    }

    async fn post_trigger(&self, job_id: &str, action: &str) -> Result<(), AppError> {
        let url = self.build_url(&format!("/jobs/{}/{}", job_id, action))?;

        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("Trigger request failed: {}", e)))?;

        let status = response.status();
        info!(
            "[JOBS] POST /jobs/{}/{} -> {}",
            job_id,
            action,
            status.as_u16()
        );

        if !status.is_success() {
            return Err(parse_error_response(response, status, &format!("Job {}", job_id)).await);
        }

        Ok(())
    }

    /// Fetches the raw result rows for a completed job.
    ///
    /// Only meaningful once the job has reached `Completed`; callers must
    /// gate on terminal status.
    pub async fn fetch_results(&self, job_id: &str) -> Result<Vec<ResultRecord>, AppError> {
        let url = self.build_url(&format!("/jobs/{}/results", job_id))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("Results fetch failed: {}", e)))?;

        let status = response.status();
        info!("[JOBS] GET /jobs/{}/results -> {}", job_id, status.as_u16());

        if !status.is_success() {
            return Err(
                parse_error_response(response, status, &format!("Results for job {}", job_id))
                    .await,
            );
        }

        response.json().await.map_err(|e| AppError::ApiError {
            status: status.as_u16(),
            message: format!("Failed to parse results response: {}", e),
        })
    }

    /// Looks up a single provider in the directory.
    ///
    /// Returns `Ok(None)` when the provider does not exist (404 or a null
    /// payload) so reconciliation can degrade to fallback values without
    /// treating absence as a failure.
    pub async fn get_provider(&self, provider_id: &str) -> Result<Option<ProviderRecord>, AppError> {
        let url = self.build_url(&format!("/providers/{}", provider_id))?;

        let response = self.client.get(url).send().await.map_err(|e| {
            AppError::ConnectionFailed(format!("Provider lookup failed: {}", e))
        })?;

        let status = response.status();
        info!(
            "[DIRECTORY] GET /providers/{} -> {}",
            provider_id,
            status.as_u16()
        );

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            return Err(
                parse_error_response(response, status, &format!("Provider {}", provider_id)).await,
            );
        }

        let body: ProviderLookupResponse =
            response.json().await.map_err(|e| AppError::ApiError {
                status: status.as_u16(),
                message: format!("Failed to parse provider response: {}", e),
            })?;

        Ok(body.provider)
    }

    /// Lists all providers, optionally filtered client-side by a
    /// case-insensitive substring of the name or NPI.
    pub async fn list_providers(
        &self,
        query: Option<&str>,
    ) -> Result<Vec<ProviderRecord>, AppError> {
        let url = self.build_url("/providers")?;

        let response = self.client.get(url).send().await.map_err(|e| {
            AppError::ConnectionFailed(format!("Provider listing failed: {}", e))
        })?;

        let status = response.status();
        info!("[DIRECTORY] GET /providers -> {}", status.as_u16());

        if !status.is_success() {
            return Err(parse_error_response(response, status, "Provider listing").await);
        }

        let providers: Vec<ProviderRecord> =
            response.json().await.map_err(|e| AppError::ApiError {
                status: status.as_u16(),
                message: format!("Failed to parse provider listing: {}", e),
            })?;

        Ok(match query {
            Some(q) if !q.is_empty() => filter_providers(providers, q),
            _ => providers,
        })
    }

    fn build_url(&self, path: &str) -> Result<Url, AppError> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::Internal(format!("Failed to build URL for {}: {}", path, e)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Filters providers by a case-insensitive substring of name or NPI.
pub fn filter_providers(providers: Vec<ProviderRecord>, query: &str) -> Vec<ProviderRecord> {
    let query = query.to_lowercase();
    providers
        .into_iter()
        .filter(|p| {
            p.name
                .as_deref()
                .is_some_and(|n| n.to_lowercase().contains(&query))
                || p.npi
                    .as_deref()
                    .is_some_and(|n| n.to_lowercase().contains(&query))
        })
        .collect()
}

/// Parses an error response body and maps it to an `AppError`.
async fn parse_error_response(
    response: reqwest::Response,
    status: reqwest::StatusCode,
    what: &str,
) -> AppError {
    if status == reqwest::StatusCode::NOT_FOUND {
        return AppError::NotFound(what.to_string());
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("Unable to read error body"));

    let message = match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(parsed) => parsed.detail,
        Err(_) if !body.trim().is_empty() => body,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string(),
    };

    if status == reqwest::StatusCode::CONFLICT {
        return AppError::PreconditionFailed(message);
    }

    AppError::ApiError {
        status: status.as_u16(),
        message,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
