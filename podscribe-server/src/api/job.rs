//! Job API Handlers
//!
//! HTTP endpoints for job lifecycle management.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use podscribe_core::domain::job::{Job, JobStatus, JobType};
use podscribe_core::domain::progress::ProgressEvent;
use podscribe_core::dto::job::{CreateJob, JobCreated, JobFilter, JobPage, Pagination};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::job_service::{self, CancelOutcome};

/// POST /jobs
/// Queue a new job; returns as soon as it is stored
pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJob>,
) -> ApiResult<(StatusCode, Json<JobCreated>)> {
    tracing::info!("Creating {} job", req.job_type);

    let job = job_service::create_job(&state.pool, req).await?;

    Ok((
        StatusCode::CREATED,
        Json(JobCreated {
            id: job.id,
            status: job.status,
        }),
    ))
}

/// GET /jobs/{id}
/// Get job details by ID
pub async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Job>> {
    tracing::debug!("Getting job: {}", id);

    let job = job_service::get_job(&state.pool, id).await?;
    Ok(Json(job))
}

/// GET /jobs
/// List jobs, newest first
///
/// Query parameters:
/// - `status`, `type` (optional): filters
/// - `skip` (default 0), `limit` (default 20, at most 100)
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsQuery>,
) -> ApiResult<Json<JobPage>> {
    let filter = params.filter()?;
    let page = Pagination::new(params.skip, params.limit);
    tracing::debug!("Listing jobs ({:?}, {:?})", filter, page);

    let jobs = job_service::list_jobs(&state.pool, &filter, page).await?;
    Ok(Json(jobs))
}

/// DELETE /jobs/{id}
/// Cancel a queued or running job; discard a finished one
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Cancelling job: {}", id);

    match job_service::cancel_job(&state.pool, id).await? {
        CancelOutcome::Cancelled(job) => {
            if state.running.cancel(id) {
                tracing::info!("Interrupting running job {}", id);
            }
            state.events.publish(ProgressEvent::snapshot(&job));
        }
        CancelOutcome::Discarded => {}
    }

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Request Types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub skip: Option<u32>,
    pub limit: Option<u32>,
}

impl ListJobsQuery {
    fn filter(&self) -> Result<JobFilter, ApiError> {
        let status = self
            .status
            .as_deref()
            .map(str::parse::<JobStatus>)
            .transpose()
            .map_err(ApiError::BadRequest)?;
        let job_type = self
            .job_type
            .as_deref()
            .map(str::parse::<JobType>)
            .transpose()
            .map_err(ApiError::BadRequest)?;

        Ok(JobFilter { status, job_type })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use crate::broadcast::EventBroadcaster;
    use crate::db::test_pool;
    use crate::worker::RunningJobs;
    use serde_json::{Value, json};
    use std::sync::Arc;

    async fn serve() -> (String, AppState) {
        let state = AppState {
            pool: test_pool().await,
            events: Arc::new(EventBroadcaster::new(16)),
            running: RunningJobs::default(),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(state.clone());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{}", addr), state)
    }

    async fn create(client: &reqwest::Client, base: &str, job_type: &str) -> Value {
        let response = client
            .post(format!("{}/jobs", base))
            .json(&json!({"type": job_type, "input": {"audio_path": "/audio/ep.wav"}}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        response.json().await.unwrap()
    }

    #[test]
    fn test_query_filter_parsing() {
        let query = ListJobsQuery {
            status: Some("queued".into()),
            job_type: Some("pipeline".into()),
            ..Default::default()
        };
        let filter = query.filter().unwrap();
        assert_eq!(filter.status, Some(JobStatus::Queued));
        assert_eq!(filter.job_type, Some(JobType::Pipeline));

        let bad = ListJobsQuery {
            status: Some("paused".into()),
            ..Default::default()
        };
        assert!(bad.filter().is_err());
    }

    #[tokio::test]
    async fn test_job_lifecycle_over_http() {
        let (base, _) = serve().await;
        let client = reqwest::Client::new();

        let health = client.get(format!("{}/health", base)).send().await.unwrap();
        assert_eq!(health.status(), 200);

        let created = create(&client, &base, "transcribe").await;
        assert_eq!(created["status"], "queued");
        let id = created["id"].as_str().unwrap().to_string();

        let job: Value = client
            .get(format!("{}/jobs/{}", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(job["type"], "transcribe");
        assert_eq!(job["input"]["audio_path"], "/audio/ep.wav");

        let cancelled = client
            .delete(format!("{}/jobs/{}", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(cancelled.status(), 204);

        let job: Value = client
            .get(format!("{}/jobs/{}", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(job["status"], "cancelled");
        assert!(job["completed_at"].is_string());

        let discarded = client
            .delete(format!("{}/jobs/{}", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(discarded.status(), 204);

        let missing = client
            .get(format!("{}/jobs/{}", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);
        let body: Value = missing.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("not found"));

        let again = client
            .delete(format!("{}/jobs/{}", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(again.status(), 404);
    }

    #[tokio::test]
    async fn test_list_jobs_over_http() {
        let (base, _) = serve().await;
        let client = reqwest::Client::new();

        create(&client, &base, "transcribe").await;
        create(&client, &base, "diarize").await;
        let newest = create(&client, &base, "transcribe").await;

        let page: Value = client
            .get(format!("{}/jobs?type=transcribe&limit=1", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(page["total"], 2);
        assert_eq!(page["limit"], 1);
        assert_eq!(page["skip"], 0);
        assert_eq!(page["items"][0]["id"], newest["id"]);

        let page: Value = client
            .get(format!("{}/jobs?limit=1000", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(page["limit"], 100);
        assert_eq!(page["items"].as_array().unwrap().len(), 3);

        let bad = client
            .get(format!("{}/jobs?status=paused", base))
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), 400);
    }
}
