//! Queue disciplines: FIFO, Priority, Delay, and Bounded (wrapping any of
//! the other three with a hard capacity and an overflow policy).
//!
//! Every discipline implements the same [`QueueDiscipline`] trait so a
//! worker or scheduler never needs to know which ordering rule a queue uses.
//! All operations are non-blocking and return in bounded time; they never
//! hold a lock across user code.

mod bounded;
mod delay;
mod fifo;
mod priority;

pub use bounded::{BoundedQueue, OverflowPolicy};
pub use delay::DelayQueue;
pub use fifo::FifoQueue;
pub use priority::PriorityQueue;

use std::time::Instant;

use crate::error::QueueError;
use crate::job::JobId;

/// Point-in-time counts for a queue, used for telemetry and backpressure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub ready: usize,
    pub in_flight: usize,
    pub delayed: usize,
    pub capacity: Option<usize>,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.ready + self.in_flight + self.delayed
    }
}

/// Uniform capability set implemented by every queue discipline.
///
/// Concurrent access is safe; implementations serialize internally with a
/// short-held lock and never block on user-supplied processor code.
pub trait QueueDiscipline: Send + Sync + std::any::Any {
    /// Admit a job reference, already known-visible-at `visible_at` and
    /// ordered by `priority`/`sequence` where the discipline honors those.
    ///
    /// Returns [`QueueError::AlreadyEnqueued`] if `job_id` is already tracked
    /// by this queue, and [`QueueError::QueueFull`] if a Bounded wrapper
    /// rejects the admission under its overflow policy.
    fn enqueue(
        &self,
        job_id: JobId,
        priority: i64,
        visible_at: Instant,
        sequence: u64,
    ) -> Result<(), QueueError>;

    /// Lease the next eligible job reference, if any is ready at `now`.
    fn lease(&self, now: Instant) -> Option<JobId>;

    /// Acknowledge successful completion of a leased job. A no-op if the job
    /// is not currently in flight (already acked/nacked/removed).
    fn ack(&self, job_id: JobId);

    /// Return a leased job to the ready/delayed set, visible again at
    /// `visible_at`. A no-op if the job is not currently in flight.
    fn nack(&self, job_id: JobId, visible_at: Instant);

    /// Current live counts.
    fn size(&self) -> QueueCounts;

    /// Remove a job reference entirely, from whichever internal set it is
    /// in. Returns [`QueueError::NotFound`] if the id is unknown.
    fn remove(&self, job_id: JobId) -> Result<(), QueueError>;

    /// For disciplines with delayed items, the earliest timestamp at which
    /// the next item becomes visible. Lets a scheduler park a worker with a
    /// precise timer instead of busy-polling.
    fn next_visible_at(&self) -> Option<Instant> {
        None
    }

    /// Escape hatch for callers that need to recover the concrete type (the
    /// `Queue` facade uses this to find a [`BoundedQueue`]'s capacity
    /// notification handle without every discipline knowing about it).
    fn as_any(&self) -> &dyn std::any::Any;
}
