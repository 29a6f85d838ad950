use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Mutex;
use std::time::Instant;

use crate::error::QueueError;
use crate::job::JobId;

use super::{QueueCounts, QueueDiscipline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    visible_at: Instant,
    sequence: u64,
    job_id: JobId,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on visible_at: the earliest time must compare greatest so
        // BinaryHeap::pop returns it first.
        other
            .visible_at
            .cmp(&self.visible_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct State {
    heap: BinaryHeap<Entry>,
    in_flight: HashSet<JobId>,
    known: HashSet<JobId>,
    removed: HashSet<JobId>,
}

impl State {
    /// Drop tombstoned entries sitting at the top of the heap so a
    /// subsequent peek reflects a real, still-tracked item.
    fn drop_tombstones_at_top(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.removed.remove(&top.job_id) {
                self.heap.pop();
                continue;
            }
            if !self.known.contains(&top.job_id) {
                self.heap.pop();
                continue;
            }
            break;
        }
    }
}

/// Items carry a visible-at timestamp; `lease(now)` returns the
/// earliest-visible item whose `visible_at <= now`, else nothing. Visibility
/// is re-evaluated at every `lease` call, so a stale item is never leased
/// even under a lazy tombstone sweep.
pub struct DelayQueue {
    state: Mutex<State>,
}

impl Default for DelayQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                in_flight: HashSet::new(),
                known: HashSet::new(),
                removed: HashSet::new(),
            }),
        }
    }
}

impl QueueDiscipline for DelayQueue {
    fn enqueue(
        &self,
        job_id: JobId,
        _priority: i64,
        visible_at: Instant,
        sequence: u64,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        if !state.known.insert(job_id) {
            return Err(QueueError::AlreadyEnqueued(job_id));
        }
        state.heap.push(Entry {
            visible_at,
            sequence,
            job_id,
        });
        Ok(())
    }

    fn lease(&self, now: Instant) -> Option<JobId> {
        let mut state = self.state.lock().unwrap();
        state.drop_tombstones_at_top();
        let top = state.heap.peek()?;
        if top.visible_at > now {
            return None;
        }
        let entry = state.heap.pop().unwrap();
        state.in_flight.insert(entry.job_id);
        Some(entry.job_id)
    }

    fn ack(&self, job_id: JobId) {
        let mut state = self.state.lock().unwrap();
        if state.in_flight.remove(&job_id) {
            state.known.remove(&job_id);
        }
    }

    fn nack(&self, job_id: JobId, visible_at: Instant) {
        let mut state = self.state.lock().unwrap();
        if state.in_flight.remove(&job_id) {
            let sequence = 0;
            state.heap.push(Entry {
                visible_at,
                sequence,
                job_id,
            });
        }
    }

    fn size(&self) -> QueueCounts {
        let state = self.state.lock().unwrap();
        let now = Instant::now();
        let mut ready = 0;
        let mut delayed = 0;
        for entry in state.heap.iter() {
            if state.removed.contains(&entry.job_id) || !state.known.contains(&entry.job_id) {
                continue;
            }
            if entry.visible_at <= now {
                ready += 1;
            } else {
                delayed += 1;
            }
        }
        QueueCounts {
            ready,
            in_flight: state.in_flight.len(),
            delayed,
            capacity: None,
        }
    }

    fn remove(&self, job_id: JobId) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        if !state.known.remove(&job_id) {
            return Err(QueueError::NotFound(job_id));
        }
        if !state.in_flight.remove(&job_id) {
            state.removed.insert(job_id);
        }
        Ok(())
    }

    fn next_visible_at(&self) -> Option<Instant> {
        let mut state = self.state.lock().unwrap();
        state.drop_tombstones_at_top();
        state.heap.peek().map(|e| e.visible_at)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn not_visible_before_deadline() {
        let q = DelayQueue::new();
        let a = JobId::new();
        let start = Instant::now();
        q.enqueue(a, 0, start + Duration::from_millis(500), 0).unwrap();

        assert_eq!(q.lease(start), None);
        assert_eq!(q.lease(start + Duration::from_millis(499)), None);
    }

    #[test]
    fn visible_exactly_at_deadline() {
        let q = DelayQueue::new();
        let a = JobId::new();
        let start = Instant::now();
        let visible_at = start + Duration::from_millis(500);
        q.enqueue(a, 0, visible_at, 0).unwrap();

        assert_eq!(q.lease(visible_at), Some(a));
    }

    #[test]
    fn next_visible_at_reports_earliest_pending() {
        let q = DelayQueue::new();
        let start = Instant::now();
        let a = JobId::new();
        let b = JobId::new();
        q.enqueue(a, 0, start + Duration::from_secs(5), 0).unwrap();
        q.enqueue(b, 0, start + Duration::from_secs(1), 1).unwrap();

        assert_eq!(q.next_visible_at(), Some(start + Duration::from_secs(1)));
    }
}
