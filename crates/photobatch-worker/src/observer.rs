//! Notification seam between the run loop and the outside world.

use tokio::sync::mpsc;

use photobatch_core::error::AppError;
use photobatch_entity::batch::{BatchSummary, ProgressSnapshot};

/// Receives run notifications. All methods default to no-ops.
///
/// Callbacks are invoked outside the processor's internal lock, so they may
/// call back into the processor (e.g. to read its status).
pub trait BatchObserver: Send + Sync {
    /// A job settled (completed or exhausted its attempts).
    fn on_progress(&self, _snapshot: &ProgressSnapshot) {}

    /// The run loop exited, naturally or after a pause.
    fn on_complete(&self, _summary: &BatchSummary) {}

    /// The run loop aborted on an infrastructure fault.
    fn on_error(&self, _error: &AppError) {}
}

/// Observer that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl BatchObserver for NoopObserver {}

/// A run notification in owned form.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    /// See [`BatchObserver::on_progress`].
    Progress(ProgressSnapshot),
    /// See [`BatchObserver::on_complete`].
    Complete(BatchSummary),
    /// See [`BatchObserver::on_error`].
    Error(AppError),
}

/// Forwards notifications into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<BatchEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: BatchEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Batch event receiver dropped");
        }
    }
}

impl BatchObserver for ChannelObserver {
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self.send(BatchEvent::Progress(snapshot.clone()));
    }

    fn on_complete(&self, summary: &BatchSummary) {
        self.send(BatchEvent::Complete(summary.clone()));
    }

    fn on_error(&self, error: &AppError) {
        self.send(BatchEvent::Error(error.clone()));
    }
}
