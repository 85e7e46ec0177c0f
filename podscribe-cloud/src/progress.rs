//! Progress reporting
//!
//! Executing code never talks to subscribers directly. It pushes
//! [`ProgressUpdate`]s into a channel and whoever owns the receiving end
//! (the server's worker) persists and broadcasts them.
//!
//! Percentages only move forward. Every clone and stage of a reporter shares
//! one high-water mark, and a lower percentage is raised to it, so a local
//! fallback that restarts its own count never drags the job backwards.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;

/// One progress report from executing code
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub percentage: Option<f32>,
    pub step: Option<String>,
    pub message: Option<String>,
}

/// Sending half of a job's progress channel
///
/// Cloning is cheap. Reports sent after the receiver is gone are discarded.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
    /// Overall range `(start, end)` this reporter's 0-100 maps onto
    range: (f32, f32),
    /// Highest percentage sent so far, as `f32` bits
    high_water: Arc<AtomicU32>,
}

impl ProgressReporter {
    /// Creates a reporter and the receiver it feeds
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
                range: (0.0, 100.0),
                high_water: Arc::default(),
            },
            rx,
        )
    }

    /// A reporter that drops everything
    pub fn noop() -> Self {
        Self {
            tx: None,
            range: (0.0, 100.0),
            high_water: Arc::default(),
        }
    }

    /// A reporter for one stage of a larger job
    ///
    /// Percentages reported through it are mapped onto `start..end` of this
    /// reporter's own range.
    pub fn stage(&self, start: f32, end: f32) -> Self {
        Self {
            tx: self.tx.clone(),
            range: (self.scale(start), self.scale(end)),
            high_water: Arc::clone(&self.high_water),
        }
    }

    fn scale(&self, percentage: f32) -> f32 {
        let (start, end) = self.range;
        start + (end - start) * percentage.clamp(0.0, 100.0) / 100.0
    }

    /// Raises the shared mark to `percentage` and returns the new mark
    ///
    /// Bit patterns of positive floats order like the floats themselves.
    fn advance(&self, percentage: f32) -> f32 {
        let percentage = if percentage > 0.0 { percentage } else { 0.0 };
        let previous = self
            .high_water
            .fetch_max(percentage.to_bits(), Ordering::SeqCst);
        percentage.max(f32::from_bits(previous))
    }

    pub fn report(&self, mut update: ProgressUpdate) {
        if let Some(tx) = &self.tx {
            update.percentage = update.percentage.map(|p| self.advance(self.scale(p)));
            let _ = tx.send(update);
        }
    }

    /// Reports entering a named step at a given percentage
    pub fn step(&self, percentage: f32, step: &str, message: impl Into<String>) {
        self.report(ProgressUpdate {
            percentage: Some(percentage),
            step: Some(step.to_string()),
            message: Some(message.into()),
        });
    }

    /// Reports a message without moving the percentage
    pub fn message(&self, message: impl Into<String>) {
        self.report(ProgressUpdate {
            message: Some(message.into()),
            ..Default::default()
        });
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::noop()
    }
}
