//! Progress event fan-out
//!
//! In-memory publish/subscribe keyed by job id. Every subscriber owns a
//! bounded FIFO queue, so a slow listener only ever loses its own events.
//! Nothing is buffered for jobs without subscribers.

use futures_util::Stream;
use futures_util::stream;
use podscribe_core::domain::progress::ProgressEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

type SubscriberMap = HashMap<Uuid, HashMap<u64, mpsc::Sender<ProgressEvent>>>;

pub struct EventBroadcaster {
    queue_size: usize,
    next_id: AtomicU64,
    subscribers: Mutex<SubscriberMap>,
}

impl EventBroadcaster {
    pub fn new(queue_size: usize) -> Self {
        Self {
            queue_size: queue_size.max(1),
            next_id: AtomicU64::new(0),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SubscriberMap> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new listener for `job_id`
    pub fn subscribe(self: &Arc<Self>, job_id: Uuid) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_size);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.lock().entry(job_id).or_default().insert(id, tx);
        debug!("Subscriber {} attached to job {}", id, job_id);

        Subscription {
            job_id,
            id,
            rx,
            hub: Arc::clone(self),
            finished: false,
        }
    }

    /// Delivers `event` to every current subscriber of its job
    pub fn publish(&self, event: ProgressEvent) {
        let subscribers = self.lock();
        let Some(queues) = subscribers.get(&event.job_id) else {
            return;
        };

        for (id, tx) in queues {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Subscriber {} of job {} is not keeping up, dropping event",
                        id, event.job_id
                    );
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Number of live subscribers for `job_id`
    pub fn subscriber_count(&self, job_id: Uuid) -> usize {
        self.lock().get(&job_id).map_or(0, HashMap::len)
    }

    fn unsubscribe(&self, job_id: Uuid, id: u64) {
        let mut subscribers = self.lock();
        let Some(queues) = subscribers.get_mut(&job_id) else {
            return;
        };
        if queues.remove(&id).is_some() {
            debug!("Subscriber {} detached from job {}", id, job_id);
        }
        if queues.is_empty() {
            subscribers.remove(&job_id);
        }
    }
}

/// One listener's view of a job's events
///
/// Ends after the first terminal event, which also detaches the queue;
/// dropping it early does the same.
pub struct Subscription {
    job_id: Uuid,
    id: u64,
    rx: mpsc::Receiver<ProgressEvent>,
    hub: Arc<EventBroadcaster>,
    finished: bool,
}

impl Subscription {
    #[cfg(test)]
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Next event, or `None` once a terminal event has been delivered
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }

        let event = self.rx.recv().await?;
        if event.is_terminal() {
            self.finished = true;
            self.rx.close();
            self.hub.unsubscribe(self.job_id, self.id);
        }
        Some(event)
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        stream::unfold(self, |mut subscription| async move {
            let event = subscription.next().await?;
            Some((event, subscription))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.job_id, self.id);
    }
}
