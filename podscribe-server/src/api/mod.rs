//! API Module
//!
//! HTTP API layer for the job server.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod events;
pub mod health;
pub mod job;

use axum::{Router, routing::get};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::broadcast::EventBroadcaster;
use crate::worker::RunningJobs;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub events: Arc<EventBroadcaster>,
    pub running: RunningJobs,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Job endpoints
        .route("/jobs", get(job::list_jobs).post(job::create_job))
        .route("/jobs/{id}", get(job::get_job).delete(job::cancel_job))
        .route("/jobs/{id}/events", get(events::job_events))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
