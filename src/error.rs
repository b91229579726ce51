use serde::Serialize;
use thiserror::Error;

/// User-friendly error presentation for the operator UI.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Network / API ─────────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    // ── Triggers ──────────────────────────────────────────────────────────────
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Trigger already in flight")]
    TriggerInFlight,

    // ── Polling ───────────────────────────────────────────────────────────────
    #[error("A poller is already active for job {job_id}")]
    PollerActive { job_id: String },

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Converts the error into a user-friendly presentation suitable for UI display.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            AppError::ConnectionFailed(_) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: "Could not reach the validation service. Please check your internet connection.".into(),
                action: Some("Check network and retry".into()),
            },

            AppError::ApiError { status, message } => ErrorPresentation {
                title: "Service Error".into(),
                message: format!(
                    "The validation service returned an error (HTTP {}): {}",
                    status, message
                ),
                action: Some("Try again".into()),
            },

            AppError::NotFound(what) => ErrorPresentation {
                title: "Not Found".into(),
                message: format!("{} does not exist on the server.", what),
                action: Some("Go back and check the identifier".into()),
            },

            AppError::PreconditionFailed(msg) => ErrorPresentation {
                title: "Action Not Allowed".into(),
                message: format!("The job is not in a state that allows this action: {}", msg),
                action: Some("Refresh the job status".into()),
            },

            AppError::TriggerInFlight => ErrorPresentation {
                title: "Already Running".into(),
                message: "A previous request for this action is still in flight.".into(),
                action: Some("Wait for it to finish".into()),
            },

            AppError::PollerActive { job_id } => ErrorPresentation {
                title: "Already Watching".into(),
                message: format!("Job {} is already being monitored.", job_id),
                action: None,
            },

            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}

// Allow AppError to cross a JSON boundary as its presentation.
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_presentation().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns all AppError variants for exhaustive testing.
    fn all_variants() -> Vec<AppError> {
        vec![
            AppError::ConnectionFailed("timeout".into()),
            AppError::ApiError {
                status: 500,
                message: "internal server error".into(),
            },
            AppError::NotFound("Job abc123".into()),
            AppError::PreconditionFailed("job is not pending".into()),
            AppError::TriggerInFlight,
            AppError::PollerActive {
                job_id: "abc123".into(),
            },
            AppError::Internal("something broke".into()),
        ]
    }

    #[test]
    fn all_variants_have_nonempty_title_and_message() {
        for variant in all_variants() {
            let presentation = variant.to_presentation();
            assert!(
                !presentation.title.trim().is_empty(),
                "Empty title for {:?}",
                variant
            );
            assert!(
                !presentation.message.trim().is_empty(),
                "Empty message for {:?}",
                variant
            );
        }
    }

    #[test]
    fn connection_failed_suggests_check_network() {
        let presentation = AppError::ConnectionFailed("timeout".into()).to_presentation();
        let action = presentation
            .action
            .expect("ConnectionFailed should have action");
        let action_lower = action.to_lowercase();
        assert!(
            action_lower.contains("network") || action_lower.contains("retry"),
            "ConnectionFailed action should mention network/retry, got: {}",
            action
        );
    }

    #[test]
    fn api_error_mentions_status_code() {
        let presentation = AppError::ApiError {
            status: 503,
            message: "unavailable".into(),
        }
        .to_presentation();
        assert!(
            presentation.message.contains("503"),
            "ApiError message should include the HTTP status"
        );
    }

    #[test]
    fn serialization_produces_valid_json_with_required_fields() {
        for variant in all_variants() {
            let json = serde_json::to_string(&variant)
                .unwrap_or_else(|_| panic!("Failed to serialize {:?}", variant));

            let parsed: serde_json::Value = serde_json::from_str(&json)
                .unwrap_or_else(|_| panic!("Failed to parse JSON for {:?}", variant));

            assert!(parsed.get("title").is_some());
            assert!(parsed.get("message").is_some());
            // action can be null, but field should exist
            assert!(parsed.get("action").is_some());
        }
    }
}
