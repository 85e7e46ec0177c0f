//! Job Repository
//!
//! Handles all database operations related to jobs.

use chrono::{DateTime, Utc};
use podscribe_core::domain::job::{Job, JobInput, JobProgress, JobStatus, JobType};
use podscribe_core::dto::job::{CreateJob, JobFilter, JobUpdate, Pagination};
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, job_type, status, input, progress_percentage, progress_step, \
     progress_message, result, error, created_at, updated_at, started_at, completed_at";

/// Create a new queued job in the database
pub async fn create(pool: &SqlitePool, req: CreateJob) -> Result<Job, sqlx::Error> {
    let job = Job::new(req.job_type, req.input);

    sqlx::query(
        r#"
        INSERT INTO jobs (id, job_type, status, input, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job.id)
    .bind(job.job_type.as_str())
    .bind(job.status.as_str())
    .bind(Json(&job.input))
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(pool)
    .await?;

    Ok(job)
}

/// Find a job by ID
pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT id, job_type, status, input, progress_percentage, progress_step,
               progress_message, result, error, created_at, updated_at,
               started_at, completed_at
        FROM jobs
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(Job::try_from).transpose()
}

/// List jobs matching `filter`, newest first, with the unpaginated total
pub async fn list(
    pool: &SqlitePool,
    filter: &JobFilter,
    page: Pagination,
) -> Result<(Vec<Job>, u64), sqlx::Error> {
    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM jobs");
    push_filter(&mut count, filter);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM jobs", JOB_COLUMNS));
    push_filter(&mut select, filter);
    select
        .push(" ORDER BY created_at DESC, rowid DESC LIMIT ")
        .push_bind(i64::from(page.limit))
        .push(" OFFSET ")
        .push_bind(i64::from(page.skip));

    let rows = select.build_query_as::<JobRow>().fetch_all(pool).await?;
    let jobs = rows
        .into_iter()
        .map(Job::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok((jobs, u64::try_from(total).unwrap_or(0)))
}

/// Atomically move the oldest queued job to running and return it
///
/// A single `UPDATE ... RETURNING` statement, so concurrent callers never
/// claim the same job.
pub async fn claim_next(pool: &SqlitePool) -> Result<Option<Job>, sqlx::Error> {
    let now = Utc::now();

    let row = sqlx::query_as::<_, JobRow>(
        r#"
        UPDATE jobs
        SET status = 'running', started_at = ?, updated_at = ?
        WHERE id = (
            SELECT id FROM jobs
            WHERE status = 'queued'
            ORDER BY created_at ASC, rowid ASC
            LIMIT 1
        )
        AND status = 'queued'
        RETURNING id, job_type, status, input, progress_percentage, progress_step,
                  progress_message, result, error, created_at, updated_at,
                  started_at, completed_at
        "#,
    )
    .bind(now)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    row.map(Job::try_from).transpose()
}

/// Merge the supplied fields into a job whose status is still `expected`
///
/// Returns `None` when the job is gone or its status changed concurrently.
pub async fn update(
    pool: &SqlitePool,
    id: Uuid,
    expected: JobStatus,
    update: &JobUpdate,
) -> Result<Option<Job>, sqlx::Error> {
    let mut query = QueryBuilder::<Sqlite>::new("UPDATE jobs SET updated_at = ");
    query.push_bind(Utc::now());

    if let Some(status) = update.status {
        query.push(", status = ").push_bind(status.as_str());
    }
    if let Some(progress) = &update.progress {
        query
            .push(", progress_percentage = ")
            .push_bind(progress.percentage)
            .push(", progress_step = ")
            .push_bind(progress.step.clone())
            .push(", progress_message = ")
            .push_bind(progress.message.clone());
    }
    if let Some(result) = &update.result {
        query.push(", result = ").push_bind(Json(result.clone()));
    }
    if let Some(error) = &update.error {
        query.push(", error = ").push_bind(error.clone());
    }
    if let Some(started_at) = update.started_at {
        query.push(", started_at = ").push_bind(started_at);
    }
    if let Some(completed_at) = update.completed_at {
        query.push(", completed_at = ").push_bind(completed_at);
    }

    query
        .push(" WHERE id = ")
        .push_bind(id)
        .push(" AND status = ")
        .push_bind(expected.as_str())
        .push(format!(" RETURNING {}", JOB_COLUMNS));

    let row = query.build_query_as::<JobRow>().fetch_optional(pool).await?;
    row.map(Job::try_from).transpose()
}

/// Delete a job by ID
pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

fn push_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &JobFilter) {
    query.push(" WHERE 1 = 1");
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(job_type) = filter.job_type {
        query.push(" AND job_type = ").push_bind(job_type.as_str());
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    job_type: String,
    status: String,
    input: Json<JobInput>,
    progress_percentage: f32,
    progress_step: Option<String>,
    progress_message: Option<String>,
    result: Option<Json<serde_json::Value>>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = sqlx::Error;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let job_type: JobType = row.job_type.parse().map_err(decode_error)?;
        let status: JobStatus = row.status.parse().map_err(decode_error)?;

        Ok(Job {
            id: row.id,
            job_type,
            status,
            input: row.input.0,
            progress: JobProgress {
                percentage: row.progress_percentage,
                step: row.progress_step,
                message: row.progress_message,
            },
            result: row.result.map(|r| r.0),
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}
