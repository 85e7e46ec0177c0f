//! Error types for the capability layer
//!
//! Every failure is a [`ProviderError`] tagged with an [`ErrorKind`] and an
//! explicit `recoverable` flag. Callers branch on the flag to decide whether
//! falling back to local execution makes sense.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for capability operations
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or missing credentials (HTTP 401)
    Auth,
    /// The remote endpoint does not exist (HTTP 404)
    EndpointNotFound,
    /// The remote service rejected or never received a submission
    Submission,
    /// Moving the input to object storage failed
    Upload,
    /// The remote worker reported failure
    JobFailed,
    /// The remote job did not reach a terminal state in time
    Timeout,
    /// No backend is registered under the requested name
    UnknownProvider,
    /// Configuration is incomplete or inconsistent
    InvalidConfig,
    /// The owning job was cancelled
    Cancelled,
    /// A local backend failed
    LocalExecution,
    /// Anything else, such as an unparsable remote output
    Unexpected,
}

/// Error raised by providers, remote clients and uploaders
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    /// Whether falling back to another execution path is sensible
    pub recoverable: bool,
    /// Remote job id, when the failure concerns a submitted job
    pub job_id: Option<String>,
}

impl ProviderError {
    fn new(kind: ErrorKind, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            recoverable,
            job_id: None,
        }
    }

    fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn auth(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Auth,
            format!("Authentication failed: {}", detail.into()),
            false,
        )
    }

    pub fn endpoint_not_found(endpoint: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::EndpointNotFound,
            format!("Endpoint not found: {}", endpoint.into()),
            false,
        )
    }

    pub fn submission(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Submission,
            format!("Job submission failed: {}", detail.into()),
            true,
        )
    }

    pub fn upload(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Upload,
            format!("Upload failed: {}", detail.into()),
            true,
        )
    }

    pub fn job_failed(job_id: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::JobFailed,
            format!("Remote job {} failed: {}", job_id, detail.into()),
            true,
        )
        .with_job_id(job_id)
    }

    pub fn timeout(job_id: &str, timeout: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!(
                "Remote job {} did not finish within {}s. \
                 Increase CLOUD_TIMEOUT or retry later when the service is less busy.",
                job_id,
                timeout.as_secs_f64()
            ),
            true,
        )
        .with_job_id(job_id)
    }

    pub fn unknown_provider(name: &str, capability: &str, valid: &[&str]) -> Self {
        Self::new(
            ErrorKind::UnknownProvider,
            format!(
                "Unknown {} provider '{}'. Valid providers: {}",
                capability,
                name,
                valid.join(", ")
            ),
            false,
        )
    }

    pub fn invalid_config(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::InvalidConfig,
            format!("Invalid configuration: {}", detail.into()),
            false,
        )
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Job was cancelled", false)
    }

    pub fn local(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::LocalExecution,
            format!("Local execution failed: {}", detail.into()),
            false,
        )
    }

    pub fn unexpected(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, detail, true)
    }

    /// Maps the HTTP status codes with a fixed meaning onto error kinds
    ///
    /// Returns `None` for statuses the caller must classify itself.
    pub fn from_status(status: u16, endpoint: &str, body: &str) -> Option<Self> {
        match status {
            401 => Some(Self::auth(format!("{} rejected the API key", endpoint))),
            404 => Some(Self::endpoint_not_found(endpoint)),
            s if s >= 400 => Some(Self::submission(format!("HTTP {}: {}", s, body))),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        Self::submission(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverability_table() {
        assert!(!ProviderError::auth("x").recoverable);
        assert!(!ProviderError::endpoint_not_found("x").recoverable);
        assert!(ProviderError::upload("x").recoverable);
        assert!(ProviderError::job_failed("job-1", "x").recoverable);
        assert!(ProviderError::timeout("job-1", Duration::from_secs(1)).recoverable);
        assert!(!ProviderError::unknown_provider("x", "asr", &[]).recoverable);
        assert!(ProviderError::submission("x").recoverable);
        assert!(!ProviderError::invalid_config("x").recoverable);
        assert!(!ProviderError::cancelled().recoverable);
        assert!(!ProviderError::local("x").recoverable);
    }

    #[test]
    fn test_job_failed_mentions_job_and_cause() {
        let err = ProviderError::job_failed("abc-123", "out of memory");
        assert_eq!(err.kind, ErrorKind::JobFailed);
        assert_eq!(err.job_id.as_deref(), Some("abc-123"));
        assert!(err.to_string().contains("abc-123"));
        assert!(err.to_string().contains("out of memory"));
    }

    #[test]
    fn test_timeout_message_is_actionable() {
        let err = ProviderError::timeout("abc-123", Duration::from_secs(600));
        let msg = err.to_string();
        assert!(msg.contains("600s"));
        assert!(msg.contains("CLOUD_TIMEOUT"));
        assert!(msg.contains("retry later"));
    }

    #[test]
    fn test_unknown_provider_lists_names() {
        let err = ProviderError::unknown_provider("whisperx", "asr", &["cloud", "local"]);
        assert_eq!(
            err.to_string(),
            "Unknown asr provider 'whisperx'. Valid providers: cloud, local"
        );
    }

    #[test]
    fn test_status_mapping() {
        let kind = |s| ProviderError::from_status(s, "ep", "").map(|e| e.kind);
        assert_eq!(kind(401), Some(ErrorKind::Auth));
        assert_eq!(kind(404), Some(ErrorKind::EndpointNotFound));
        assert_eq!(kind(500), Some(ErrorKind::Submission));
        assert_eq!(kind(429), Some(ErrorKind::Submission));
        assert_eq!(kind(200), None);
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProviderError>();
    }
}
