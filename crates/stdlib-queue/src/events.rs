//! Structured event bus.
//!
//! Mirrors the teacher crate's `EventBus`: an at-most-once, in-memory,
//! non-replaying fan-out. Slow subscribers must not stall the runtime, so
//! this is backed by `tokio::sync::broadcast` — a lagged receiver drops
//! events instead of blocking the publisher.

use std::time::Instant;

use tokio::sync::broadcast;

use crate::job::{JobId, QueueId, WorkerId};

/// The kind of lifecycle or backpressure transition an [`EventRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Enqueued,
    Leased,
    Completed,
    Failed,
    Retried,
    DeadLettered,
    Cancelled,
    BackpressureApplied,
    BackpressureReleased,
    BackpressureRejected,
    BackpressureBlocked,
    BackpressureThrottled,
    BackpressureRedirected,
    WorkerRestarted,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Enqueued => "enqueued",
            EventKind::Leased => "leased",
            EventKind::Completed => "completed",
            EventKind::Failed => "failed",
            EventKind::Retried => "retried",
            EventKind::DeadLettered => "dead_lettered",
            EventKind::Cancelled => "cancelled",
            EventKind::BackpressureApplied => "applied",
            EventKind::BackpressureReleased => "released",
            EventKind::BackpressureRejected => "rejected",
            EventKind::BackpressureBlocked => "blocked",
            EventKind::BackpressureThrottled => "throttled",
            EventKind::BackpressureRedirected => "redirected",
            EventKind::WorkerRestarted => "worker_restarted",
        }
    }
}

/// A structured, best-effort-delivered event.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub timestamp: Instant,
    pub queue_id: Option<QueueId>,
    pub job_id: Option<JobId>,
    pub worker_id: Option<WorkerId>,
    pub kind: EventKind,
    pub attempt: Option<u32>,
    pub detail: String,
}

impl EventRecord {
    pub fn new(kind: EventKind, timestamp: Instant) -> Self {
        Self {
            timestamp,
            queue_id: None,
            job_id: None,
            worker_id: None,
            kind,
            attempt: None,
            detail: String::new(),
        }
    }

    pub fn with_queue(mut self, queue_id: QueueId) -> Self {
        self.queue_id = Some(queue_id);
        self
    }

    pub fn with_job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_worker(mut self, worker_id: WorkerId) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

/// Non-blocking fan-out event bus. Cloning shares the same underlying
/// channel, like the teacher's `EventBus`.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventRecord>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Best-effort: if there are no subscribers this is a
    /// no-op; a lagging subscriber misses events rather than stalling the
    /// publisher.
    pub fn publish(&self, event: EventRecord) {
        tracing::debug!(kind = event.kind.name(), detail = %event.detail, "queue event");
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
