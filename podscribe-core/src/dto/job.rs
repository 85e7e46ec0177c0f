//! Job DTOs for the job management interface

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{Job, JobInput, JobProgress, JobStatus, JobType};

/// Request to create a new job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJob {
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[serde(default)]
    pub input: JobInput,
}

/// Response to job creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCreated {
    pub id: Uuid,
    pub status: JobStatus,
}

/// Filters for listing jobs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    #[serde(rename = "type")]
    pub job_type: Option<JobType>,
}

/// Offset/limit pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub skip: u32,
    pub limit: u32,
}

impl Pagination {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    /// Builds a page request, clamping the limit to `1..=MAX_LIMIT`
    pub fn new(skip: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            skip: skip.unwrap_or(0),
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One page of jobs plus the total matching count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPage {
    pub items: Vec<Job>,
    pub total: u64,
    pub skip: u32,
    pub limit: u32,
}

/// Partial update to a stored job
///
/// Only `Some` fields are written; everything else is left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<JobProgress>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobUpdate {
    pub fn progress(progress: JobProgress) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn completed(result: serde_json::Value) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            result: Some(result),
            completed_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            completed_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: Some(JobStatus::Cancelled),
            completed_at: Some(Utc::now()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults_and_clamp() {
        assert_eq!(Pagination::default(), Pagination { skip: 0, limit: 20 });
        assert_eq!(Pagination::new(Some(40), Some(500)).limit, 100);
        assert_eq!(Pagination::new(None, Some(0)).limit, 1);
    }

    #[test]
    fn test_create_job_without_input() {
        let req: CreateJob = serde_json::from_str(r#"{"type": "analyze"}"#).unwrap();
        assert_eq!(req.job_type, JobType::Analyze);
        assert!(req.input.is_empty());
    }

    #[test]
    fn test_terminal_updates_are_exclusive() {
        let done = JobUpdate::completed(serde_json::json!({"text": "hi"}));
        assert!(done.result.is_some() && done.error.is_none());

        let failed = JobUpdate::failed("boom");
        assert!(failed.result.is_none() && failed.error.is_some());
        assert!(failed.completed_at.is_some());
    }
}
