use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Notify;

use crate::error::QueueError;
use crate::job::JobId;

use super::{QueueCounts, QueueDiscipline};

/// What to do when a Bounded queue is at capacity and a new job is enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Fail the enqueue with [`QueueError::QueueFull`].
    Reject,
    /// Evict the discipline's current head (marked `cancelled`, reason
    /// `overflow`) to make room for the incoming job.
    DropOldest,
    /// Discard the incoming job instead (marked `cancelled`, reason
    /// `overflow`).
    DropNewest,
    /// Suspend the caller until space frees or a deadline elapses, then
    /// fail with [`QueueError::QueueFull`]. The actual suspension is
    /// implemented by the caller (see `Queue::enqueue` in `store.rs`), which
    /// retries this discipline's `enqueue` against [`BoundedQueue::capacity_notify`].
    BlockUntil,
}

/// Wraps any other discipline with a hard capacity, applying an
/// [`OverflowPolicy`] when `enqueue` is called at capacity.
pub struct BoundedQueue {
    inner: Box<dyn QueueDiscipline>,
    capacity: usize,
    policy: OverflowPolicy,
    notify: Arc<Notify>,
    evicted: std::sync::Mutex<Vec<JobId>>,
}

impl BoundedQueue {
    pub fn new(inner: Box<dyn QueueDiscipline>, capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            inner,
            capacity,
            policy,
            notify: Arc::new(Notify::new()),
            evicted: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Handle used by a caller implementing `block_until` suspension: wait
    /// on this before retrying `enqueue`.
    pub fn capacity_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Drain job ids evicted by `DropOldest`/`DropNewest` since the last
    /// call, so the caller can mark them `cancelled` (reason `overflow`) in
    /// the job store. The discipline itself does not know about job status.
    pub fn take_evicted(&self) -> Vec<JobId> {
        std::mem::take(&mut self.evicted.lock().unwrap())
    }

    fn at_capacity(&self) -> bool {
        self.inner.size().ready >= self.capacity
    }
}

impl QueueDiscipline for BoundedQueue {
    fn enqueue(
        &self,
        job_id: JobId,
        priority: i64,
        visible_at: Instant,
        sequence: u64,
    ) -> Result<(), QueueError> {
        if !self.at_capacity() {
            return self.inner.enqueue(job_id, priority, visible_at, sequence);
        }

        match self.policy {
            OverflowPolicy::Reject => Err(QueueError::QueueFull),
            OverflowPolicy::BlockUntil => Err(QueueError::QueueFull),
            OverflowPolicy::DropNewest => {
                self.evicted.lock().unwrap().push(job_id);
                Ok(())
            }
            OverflowPolicy::DropOldest => {
                if let Some(head) = self.inner.lease(Instant::now()) {
                    self.inner.ack(head);
                    self.evicted.lock().unwrap().push(head);
                }
                self.inner.enqueue(job_id, priority, visible_at, sequence)
            }
        }
    }

    fn lease(&self, now: Instant) -> Option<JobId> {
        self.inner.lease(now)
    }

    fn ack(&self, job_id: JobId) {
        self.inner.ack(job_id);
        self.notify.notify_waiters();
    }

    fn nack(&self, job_id: JobId, visible_at: Instant) {
        self.inner.nack(job_id, visible_at);
    }

    fn size(&self) -> QueueCounts {
        let mut counts = self.inner.size();
        counts.capacity = Some(self.capacity);
        counts
    }

    fn remove(&self, job_id: JobId) -> Result<(), QueueError> {
        let result = self.inner.remove(job_id);
        if result.is_ok() {
            self.notify.notify_waiters();
        }
        result
    }

    fn next_visible_at(&self) -> Option<Instant> {
        self.inner.next_visible_at()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::super::FifoQueue;
    use super::*;

    fn now() -> Instant {
        Instant::now()
    }

    #[test]
    fn reject_at_capacity() {
        let q = BoundedQueue::new(Box::new(FifoQueue::new()), 1, OverflowPolicy::Reject);
        q.enqueue(JobId::new(), 0, now(), 0).unwrap();
        let err = q.enqueue(JobId::new(), 0, now(), 1).unwrap_err();
        assert!(matches!(err, QueueError::QueueFull));
    }

    #[test]
    fn drop_oldest_evicts_head_and_admits_new() {
        let q = BoundedQueue::new(Box::new(FifoQueue::new()), 1, OverflowPolicy::DropOldest);
        let a = JobId::new();
        let b = JobId::new();
        q.enqueue(a, 0, now(), 0).unwrap();
        q.enqueue(b, 0, now(), 1).unwrap();

        assert_eq!(q.take_evicted(), vec![a]);
        assert_eq!(q.lease(now()), Some(b));
    }

    #[test]
    fn drop_newest_discards_incoming() {
        let q = BoundedQueue::new(Box::new(FifoQueue::new()), 1, OverflowPolicy::DropNewest);
        let a = JobId::new();
        let b = JobId::new();
        q.enqueue(a, 0, now(), 0).unwrap();
        q.enqueue(b, 0, now(), 1).unwrap();

        assert_eq!(q.take_evicted(), vec![b]);
        assert_eq!(q.lease(now()), Some(a));
    }

    #[test]
    fn ready_count_never_exceeds_capacity() {
        let q = BoundedQueue::new(Box::new(FifoQueue::new()), 2, OverflowPolicy::Reject);
        for _ in 0..5 {
            let _ = q.enqueue(JobId::new(), 0, now(), 0);
        }
        assert!(q.size().ready <= 2);
    }
}
