//! Job Service
//!
//! Business logic for job management and lifecycle.

use podscribe_core::domain::job::{Job, JobStatus};
use podscribe_core::dto::job::{CreateJob, JobFilter, JobPage, JobUpdate, Pagination};
use sqlx::SqlitePool;
use std::fmt;
use uuid::Uuid;

use crate::repository::job_repository;

/// Service error type
#[derive(Debug)]
pub enum JobError {
    NotFound(Uuid),
    InvalidState(String),
    ValidationError(String),
    DatabaseError(sqlx::Error),
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::NotFound(id) => write!(f, "Job {} not found", id),
            JobError::InvalidState(msg) | JobError::ValidationError(msg) => f.write_str(msg),
            JobError::DatabaseError(err) => write!(f, "Database error: {}", err),
        }
    }
}

impl From<sqlx::Error> for JobError {
    fn from(err: sqlx::Error) -> Self {
        JobError::DatabaseError(err)
    }
}

/// What `cancel_job` did
#[derive(Debug)]
pub enum CancelOutcome {
    /// The job was queued or running and is now cancelled
    Cancelled(Job),
    /// The job was already terminal and has been deleted
    Discarded,
}

/// Create a new queued job; never waits on execution
pub async fn create_job(pool: &SqlitePool, req: CreateJob) -> Result<Job, JobError> {
    let job = job_repository::create(pool, req).await?;

    tracing::info!("Job created: {} ({})", job.id, job.job_type);

    Ok(job)
}

/// Get a job by ID
pub async fn get_job(pool: &SqlitePool, id: Uuid) -> Result<Job, JobError> {
    job_repository::find_by_id(pool, id)
        .await?
        .ok_or(JobError::NotFound(id))
}

/// List jobs, newest first
pub async fn list_jobs(
    pool: &SqlitePool,
    filter: &JobFilter,
    page: Pagination,
) -> Result<JobPage, JobError> {
    let (items, total) = job_repository::list(pool, filter, page).await?;

    Ok(JobPage {
        items,
        total,
        skip: page.skip,
        limit: page.limit,
    })
}

/// Claim the oldest queued job for execution
pub async fn claim_next_job(pool: &SqlitePool) -> Result<Option<Job>, JobError> {
    let job = job_repository::claim_next(pool).await?;

    if let Some(job) = &job {
        tracing::info!("Job {} claimed for execution", job.id);
    }

    Ok(job)
}

/// Merge `update` into a job
///
/// Status changes must follow the lifecycle; a terminal job accepts no
/// writes at all.
pub async fn update_job(pool: &SqlitePool, id: Uuid, update: JobUpdate) -> Result<Job, JobError> {
    validate_update(&update)?;

    let job = get_job(pool, id).await?;

    match update.status {
        Some(next) if !job.status.can_transition_to(next) => {
            return Err(JobError::InvalidState(format!(
                "Job {} cannot move from {} to {}",
                id, job.status, next
            )));
        }
        None if job.status.is_terminal() => {
            return Err(JobError::InvalidState(format!(
                "Job {} is {} and can no longer change",
                id, job.status
            )));
        }
        _ => {}
    }

    job_repository::update(pool, id, job.status, &update)
        .await?
        .ok_or_else(|| {
            JobError::InvalidState(format!("Job {} changed state during the update", id))
        })
}

/// Cancel a queued or running job, or discard a terminal one
///
/// Cancelling only records the new status; interrupting in-flight work is
/// the worker pool's concern.
pub async fn cancel_job(pool: &SqlitePool, id: Uuid) -> Result<CancelOutcome, JobError> {
    let job = get_job(pool, id).await?;
    cancel_from(pool, job).await
}

/// Cancel starting from a previously read `job`, re-reading it once if a
/// worker moved it in the meantime
async fn cancel_from(pool: &SqlitePool, job: Job) -> Result<CancelOutcome, JobError> {
    let id = job.id;

    match try_cancel(pool, &job).await {
        Err(JobError::InvalidState(reason)) => {
            tracing::debug!("Retrying cancel of job {}: {}", id, reason);
            let job = get_job(pool, id).await?;
            try_cancel(pool, &job).await
        }
        outcome => outcome,
    }
}

async fn try_cancel(pool: &SqlitePool, job: &Job) -> Result<CancelOutcome, JobError> {
    let id = job.id;

    if job.status.is_terminal() {
        if !job_repository::delete(pool, id).await? {
            return Err(JobError::NotFound(id));
        }
        tracing::info!("Job {} ({}) discarded", id, job.status);
        return Ok(CancelOutcome::Discarded);
    }

    let cancelled = job_repository::update(pool, id, job.status, &JobUpdate::cancelled())
        .await?
        .ok_or_else(|| {
            JobError::InvalidState(format!("Job {} left {} during the cancel", id, job.status))
        })?;
    tracing::info!("Job {} cancelled", id);

    Ok(CancelOutcome::Cancelled(cancelled))
}

// =============================================================================
// Validation
// =============================================================================

fn validate_update(update: &JobUpdate) -> Result<(), JobError> {
    if update.result.is_some() && update.error.is_some() {
        return Err(JobError::ValidationError(
            "A job cannot carry both a result and an error".to_string(),
        ));
    }

    match update.status {
        Some(JobStatus::Completed) if update.result.is_none() => Err(JobError::ValidationError(
            "A completed job requires a result".to_string(),
        )),
        Some(JobStatus::Failed) if update.error.is_none() => Err(JobError::ValidationError(
            "A failed job requires an error".to_string(),
        )),
        Some(status) if !status.is_terminal() && (update.result.is_some() || update.error.is_some()) => {
            Err(JobError::ValidationError(format!(
                "Result and error are only set on a terminal transition, not {}",
                status
            )))
        }
        None if update.result.is_some() || update.error.is_some() => Err(JobError::ValidationError(
            "Result and error are only set on a terminal transition".to_string(),
        )),
        _ => Ok(()),
    }
}
