//! Progress event types
//!
//! A `ProgressEvent` is a point-in-time snapshot published to listeners of a
//! job. Events are delivered once and never stored for replay.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{Job, JobStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    /// An event carrying only the job id
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            percentage: None,
            message: None,
            step: None,
            status: None,
            result: None,
            error: None,
        }
    }

    /// Status-only event
    pub fn status(job_id: Uuid, status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::new(job_id)
        }
    }

    /// Snapshot of a stored job's status and progress
    pub fn snapshot(job: &Job) -> Self {
        Self {
            job_id: job.id,
            percentage: Some(job.progress.percentage),
            message: job.progress.message.clone(),
            step: job.progress.step.clone(),
            status: Some(job.status),
            result: job.result.clone(),
            error: job.error.clone(),
        }
    }

    /// Whether this event ends a subscription
    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(|s| s.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{JobInput, JobType};

    #[test]
    fn test_terminal_detection() {
        let id = Uuid::new_v4();
        assert!(!ProgressEvent::new(id).is_terminal());
        assert!(!ProgressEvent::status(id, JobStatus::Running).is_terminal());
        assert!(ProgressEvent::status(id, JobStatus::Completed).is_terminal());
        assert!(ProgressEvent::status(id, JobStatus::Cancelled).is_terminal());
    }

    #[test]
    fn test_snapshot_skips_empty_fields() {
        let job = Job::new(JobType::Diarize, JobInput::new());
        let value = serde_json::to_value(ProgressEvent::snapshot(&job)).unwrap();

        assert_eq!(value["status"], "queued");
        assert_eq!(value["percentage"], 0.0);
        assert!(value.get("result").is_none());
        assert!(value.get("error").is_none());
    }
}
