//! Job Event Stream
//!
//! Server-sent events for one job. The first event is always the current
//! snapshot; the stream then follows the broadcaster until a terminal
//! status. Event names: `job_status` while the job is live, `complete` for
//! the terminal event, `error` when the job cannot be streamed.

use axum::{
    extract::{Path, State},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::{Stream, StreamExt, stream};
use podscribe_core::domain::progress::ProgressEvent;
use serde_json::json;
use std::convert::Infallible;
use std::fmt;
use std::future;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiError;
use crate::service::job_service::{self, JobError};

fn to_sse(event: &ProgressEvent) -> Result<Event, axum::Error> {
    let name = if event.is_terminal() {
        "complete"
    } else {
        "job_status"
    };
    Event::default().event(name).json_data(event)
}

fn error_event(message: &str) -> Event {
    Event::default()
        .event("error")
        .data(json!({ "error": message }).to_string())
}

/// Passes events through until one fails to encode, which is reported as a
/// final `error` event
fn until_failure<S, E>(events: S) -> impl Stream<Item = Result<Event, Infallible>>
where
    S: Stream<Item = Result<Event, E>>,
    E: fmt::Display,
{
    events.scan(false, |failed, item| {
        let next = if *failed {
            None
        } else {
            Some(Ok(item.unwrap_or_else(|e| {
                tracing::warn!("Event stream failed: {}", e);
                *failed = true;
                error_event(&format!("Event stream failed: {}", e))
            })))
        };
        future::ready(next)
    })
}

/// GET /jobs/{id}/events
pub async fn job_events(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    // Subscribe before reading the snapshot so no transition falls in between
    let subscription = state.events.subscribe(id);

    let job = match job_service::get_job(&state.pool, id).await {
        Ok(job) => job,
        Err(JobError::NotFound(id)) => {
            let error = error_event(&format!("Job {} not found", id));
            return Sse::new(stream::once(future::ready(Ok::<_, Infallible>(error))))
                .into_response();
        }
        Err(e) => return ApiError::from(e).into_response(),
    };

    let snapshot = ProgressEvent::snapshot(&job);
    tracing::debug!("Streaming events of job {} ({})", id, job.status);

    let events = if snapshot.is_terminal() {
        drop(subscription);
        stream::once(future::ready(snapshot)).boxed()
    } else {
        stream::once(future::ready(snapshot))
            .chain(subscription.into_stream())
            .boxed()
    };

    Sse::new(until_failure(events.map(|event| to_sse(&event))))
        .keep_alive(KeepAlive::default())
        .into_response()
}
