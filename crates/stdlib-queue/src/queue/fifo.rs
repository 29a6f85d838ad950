use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use crate::error::QueueError;
use crate::job::JobId;

use super::{QueueCounts, QueueDiscipline};

struct State {
    ready: VecDeque<JobId>,
    in_flight: HashSet<JobId>,
    known: HashSet<JobId>,
}

/// Append-at-tail, lease-from-head queue discipline. Lease order equals
/// enqueue order; ties are impossible since arrival order is total.
pub struct FifoQueue {
    state: Mutex<State>,
}

impl Default for FifoQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FifoQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                ready: VecDeque::new(),
                in_flight: HashSet::new(),
                known: HashSet::new(),
            }),
        }
    }
}

impl QueueDiscipline for FifoQueue {
    fn enqueue(
        &self,
        job_id: JobId,
        _priority: i64,
        _visible_at: Instant,
        _sequence: u64,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        if !state.known.insert(job_id) {
            return Err(QueueError::AlreadyEnqueued(job_id));
        }
        state.ready.push_back(job_id);
        Ok(())
    }

    fn lease(&self, _now: Instant) -> Option<JobId> {
        let mut state = self.state.lock().unwrap();
        let job_id = state.ready.pop_front()?;
        state.in_flight.insert(job_id);
        Some(job_id)
    }

    fn ack(&self, job_id: JobId) {
        let mut state = self.state.lock().unwrap();
        if state.in_flight.remove(&job_id) {
            state.known.remove(&job_id);
        }
    }

    fn nack(&self, job_id: JobId, _visible_at: Instant) {
        let mut state = self.state.lock().unwrap();
        if state.in_flight.remove(&job_id) {
            state.ready.push_back(job_id);
        }
    }

    fn size(&self) -> QueueCounts {
        let state = self.state.lock().unwrap();
        QueueCounts {
            ready: state.ready.len(),
            in_flight: state.in_flight.len(),
            delayed: 0,
            capacity: None,
        }
    }

    fn remove(&self, job_id: JobId) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        if !state.known.remove(&job_id) {
            return Err(QueueError::NotFound(job_id));
        }
        state.in_flight.remove(&job_id);
        state.ready.retain(|id| *id != job_id);
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> Instant {
        Instant::now()
    }

    #[test]
    fn lease_order_matches_enqueue_order() {
        let q = FifoQueue::new();
        let a = JobId::new();
        let b = JobId::new();
        let c = JobId::new();
        q.enqueue(a, 0, now(), 0).unwrap();
        q.enqueue(b, 0, now(), 1).unwrap();
        q.enqueue(c, 0, now(), 2).unwrap();

        assert_eq!(q.lease(now()), Some(a));
        assert_eq!(q.lease(now()), Some(b));
        assert_eq!(q.lease(now()), Some(c));
        assert_eq!(q.lease(now()), None);
    }

    #[test]
    fn double_enqueue_is_an_error() {
        let q = FifoQueue::new();
        let a = JobId::new();
        q.enqueue(a, 0, now(), 0).unwrap();
        assert!(matches!(
            q.enqueue(a, 0, now(), 1),
            Err(QueueError::AlreadyEnqueued(_))
        ));
    }

    #[test]
    fn ack_after_ack_is_noop() {
        let q = FifoQueue::new();
        let a = JobId::new();
        q.enqueue(a, 0, now(), 0).unwrap();
        q.lease(now()).unwrap();
        q.ack(a);
        q.ack(a); // no panic, no-op
        assert_eq!(q.size().total(), 0);
    }

    #[test]
    fn nack_makes_job_immediately_releasable_with_past_timestamp() {
        let q = FifoQueue::new();
        let a = JobId::new();
        q.enqueue(a, 0, now(), 0).unwrap();
        q.lease(now()).unwrap();
        q.nack(a, now() - std::time::Duration::from_secs(1));
        assert_eq!(q.lease(now()), Some(a));
    }
}
