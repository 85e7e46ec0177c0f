//! Background worker pool
//!
//! Each worker repeatedly claims the oldest queued job, runs it through the
//! capability layer and writes the outcome back to the job store. Progress
//! reported by the executing code arrives over a channel and is persisted
//! and broadcast by a forwarder task, so handlers never see subscribers.

mod handlers;

pub use handlers::{Capabilities, HandlerError};

use podscribe_cloud::progress::{ProgressReporter, ProgressUpdate};
use podscribe_core::domain::job::{Job, JobProgress, JobStatus};
use podscribe_core::domain::progress::ProgressEvent;
use podscribe_core::dto::job::JobUpdate;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broadcast::EventBroadcaster;
use crate::service::job_service::{self, JobError};

/// Cancellation tokens of the jobs currently executing
#[derive(Clone, Default)]
pub struct RunningJobs {
    tokens: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl RunningJobs {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, job_id: Uuid, parent: &CancellationToken) -> CancellationToken {
        let token = parent.child_token();
        self.lock().insert(job_id, token.clone());
        token
    }

    fn remove(&self, job_id: Uuid) {
        self.lock().remove(&job_id);
    }

    /// Trips the token of a running job; false if it is not running here
    pub fn cancel(&self, job_id: Uuid) -> bool {
        match self.lock().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, job_id: Uuid) -> bool {
        self.lock().contains_key(&job_id)
    }
}

/// Everything a worker needs, built once at startup
pub struct WorkerContext {
    pub pool: SqlitePool,
    pub events: Arc<EventBroadcaster>,
    pub capabilities: Arc<Capabilities>,
    pub running: RunningJobs,
}

pub struct WorkerPool {
    context: Arc<WorkerContext>,
    concurrency: usize,
    idle_interval: Duration,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        context: Arc<WorkerContext>,
        concurrency: usize,
        idle_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            context,
            concurrency: concurrency.max(1),
            idle_interval,
            shutdown,
        }
    }

    /// Starts the workers; they stop once `shutdown` is cancelled
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        info!(
            "Starting {} worker(s) (idle interval: {:?})",
            self.concurrency, self.idle_interval
        );

        (0..self.concurrency)
            .map(|worker| {
                let context = Arc::clone(&self.context);
                let shutdown = self.shutdown.clone();
                let idle = self.idle_interval;
                tokio::spawn(async move { run_worker(worker, context, idle, shutdown).await })
            })
            .collect()
    }
}

async fn run_worker(
    worker: usize,
    context: Arc<WorkerContext>,
    idle_interval: Duration,
    shutdown: CancellationToken,
) {
    debug!("Worker {} started", worker);

    while !shutdown.is_cancelled() {
        match job_service::claim_next_job(&context.pool).await {
            Ok(Some(job)) => run_job(&context, job, &shutdown).await,
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(idle_interval) => {}
                }
            }
            Err(e) => {
                error!("Worker {} failed to claim a job: {}", worker, e);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(idle_interval) => {}
                }
            }
        }
    }

    debug!("Worker {} stopped", worker);
}

/// Executes one claimed job to a terminal state
async fn run_job(context: &Arc<WorkerContext>, job: Job, shutdown: &CancellationToken) {
    let job_id = job.id;
    info!("Executing job {} ({})", job_id, job.job_type);

    let cancel = context.running.register(job_id, shutdown);
    context
        .events
        .publish(ProgressEvent::status(job_id, JobStatus::Running));

    let (reporter, updates) = ProgressReporter::channel();
    let forwarder = tokio::spawn(forward_progress(Arc::clone(context), job_id, updates));

    let capabilities = Arc::clone(&context.capabilities);
    let task = tokio::spawn(handlers::execute(capabilities, job, reporter, cancel.clone()));
    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(e) => Err(HandlerError::Panicked(e.to_string())),
    };

    // All reporters are dropped with the task, so the forwarder drains and ends
    if let Err(e) = forwarder.await {
        warn!("Progress forwarder for job {} panicked: {}", job_id, e);
    }
    context.running.remove(job_id);

    let update = match outcome {
        Ok(result) => JobUpdate::completed(result),
        Err(e) if e.is_cancelled() => {
            if shutdown.is_cancelled() {
                JobUpdate::failed("Interrupted by server shutdown")
            } else {
                info!("Job {} stopped after cancellation", job_id);
                JobUpdate::failed(e.to_string())
            }
        }
        Err(e) => {
            error!("Job {} failed: {}", job_id, e);
            JobUpdate::failed(e.to_string())
        }
    };

    match job_service::update_job(&context.pool, job_id, update).await {
        Ok(job) => {
            info!("Job {} finished with status {}", job_id, job.status);
            context.events.publish(ProgressEvent::snapshot(&job));
        }
        Err(JobError::InvalidState(reason)) => {
            info!("Discarding outcome of job {}: {}", job_id, reason);
        }
        Err(JobError::NotFound(_)) => {
            info!("Job {} was deleted while running", job_id);
        }
        Err(e) => error!("Failed to record outcome of job {}: {}", job_id, e),
    }
}

/// Persists and broadcasts progress until every reporter is gone
async fn forward_progress(
    context: Arc<WorkerContext>,
    job_id: Uuid,
    mut updates: mpsc::UnboundedReceiver<ProgressUpdate>,
) {
    let mut progress = JobProgress::default();

    while let Some(update) = updates.recv().await {
        if let Some(percentage) = update.percentage {
            progress.percentage = percentage;
        }
        if update.step.is_some() {
            progress.step = update.step;
        }
        progress.message = update.message;

        if let Err(e) =
            job_service::update_job(&context.pool, job_id, JobUpdate::progress(progress.clone()))
                .await
        {
            warn!("Failed to persist progress of job {}: {}", job_id, e);
        }

        context.events.publish(ProgressEvent {
            percentage: Some(progress.percentage),
            step: progress.step.clone(),
            message: progress.message.clone(),
            status: Some(JobStatus::Running),
            ..ProgressEvent::new(job_id)
        });
    }
}
