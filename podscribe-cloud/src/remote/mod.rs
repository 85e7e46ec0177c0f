//! Remote job service protocol
//!
//! A remote GPU job service accepts a job (`submit`), reports its status
//! (`get_status`) and eventually hands back an output. The polling loop in
//! [`RemoteJobClient::wait_for_completion`] is shared by every
//! implementation; implementations only provide the two calls.

mod http;

pub use http::HttpJobClient;

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ProviderError, Result};

/// Status of a job on the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Unknown,
}

impl RemoteStatus {
    /// Maps the service's wire status
    ///
    /// `CANCELLED` and `TIMED_OUT` are reported when the service gives up on
    /// a job itself; both are failures from our point of view.
    pub fn from_wire(status: &str) -> Self {
        match status {
            "IN_QUEUE" => RemoteStatus::Queued,
            "IN_PROGRESS" => RemoteStatus::InProgress,
            "COMPLETED" => RemoteStatus::Completed,
            "FAILED" | "CANCELLED" | "TIMED_OUT" => RemoteStatus::Failed,
            _ => RemoteStatus::Unknown,
        }
    }

    /// Human-readable progress message
    pub fn message(&self) -> &'static str {
        match self {
            RemoteStatus::Queued => "waiting for worker",
            RemoteStatus::InProgress => "processing",
            RemoteStatus::Completed => "done",
            RemoteStatus::Failed => "failed",
            RemoteStatus::Unknown => "status unavailable, retrying",
        }
    }
}

/// Client-side view of one remote execution, rebuilt from every poll
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteJobHandle {
    pub job_id: String,
    pub status: RemoteStatus,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl RemoteJobHandle {
    pub fn unknown(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: RemoteStatus::Unknown,
            output: None,
            error: None,
        }
    }
}

/// Raw status response body
#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl StatusResponse {
    fn into_handle(self, job_id: &str) -> RemoteJobHandle {
        let error = self.error.map(|e| match e {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });
        let status = RemoteStatus::from_wire(&self.status);
        let error = match (status, error, self.status.as_str()) {
            (RemoteStatus::Failed, None, "CANCELLED") => Some("cancelled by the service".into()),
            (RemoteStatus::Failed, None, "TIMED_OUT") => Some("timed out on the service".into()),
            (_, error, _) => error,
        };

        RemoteJobHandle {
            job_id: job_id.to_string(),
            status,
            output: self.output,
            error,
        }
    }
}

/// Polling parameters for [`RemoteJobClient::wait_for_completion`]
#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

/// Client for one remote job endpoint
#[async_trait]
pub trait RemoteJobClient: Send + Sync {
    /// Submits a job and returns the id the service assigned
    ///
    /// 401 and 404 are non-recoverable, every other failure is a
    /// recoverable submission error.
    async fn submit(&self, input: serde_json::Value) -> Result<String>;

    /// Fetches the status of a submitted job
    ///
    /// Transport failures come back as [`RemoteStatus::Unknown`] so polling
    /// can continue. 401 and 404 are raised.
    async fn get_status(&self, job_id: &str) -> Result<RemoteJobHandle>;

    /// Polls until the job is terminal, the timeout elapses, or `cancel`
    /// fires
    ///
    /// `on_progress` is called with a human message each time the status
    /// changes.
    async fn wait_for_completion(
        &self,
        job_id: &str,
        options: PollOptions,
        on_progress: &(dyn Fn(&str) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value> {
        let started = Instant::now();
        let mut last_status = None;

        loop {
            if started.elapsed() >= options.timeout {
                return Err(ProviderError::timeout(job_id, options.timeout));
            }

            let handle = tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::cancelled()),
                handle = self.get_status(job_id) => handle?,
            };

            if last_status != Some(handle.status) {
                debug!("Remote job {} is now {:?}", job_id, handle.status);
                on_progress(handle.status.message());
                last_status = Some(handle.status);
            }

            match handle.status {
                RemoteStatus::Completed => {
                    return Ok(handle.output.unwrap_or(serde_json::Value::Null));
                }
                RemoteStatus::Failed => {
                    let reason = handle.error.unwrap_or_else(|| "unknown error".to_string());
                    return Err(ProviderError::job_failed(job_id, reason));
                }
                _ => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::cancelled()),
                _ = tokio::time::sleep(options.poll_interval) => {}
            }
        }
    }
}
