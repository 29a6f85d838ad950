use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Instant;

use crate::error::QueueError;
use crate::job::JobId;

use super::{QueueCounts, QueueDiscipline};

/// Heap entry ordered by `(priority descending, sequence ascending)` so ties
/// break by insertion order, matching the documented deterministic tiebreak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    priority: i64,
    sequence: u64,
    job_id: JobId,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority must compare greater so
        // it is popped first. On a priority tie, the lower sequence number
        // (enqueued earlier) must compare greater so it is popped first.
        self.priority
            .cmp(&other.priority)
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
    meta: HashMap<JobId, (i64, u64)>,
    in_flight: HashSet<JobId>,
    /// All ids tracked by this queue (ready + in_flight).
    known: HashSet<JobId>,
    /// Tombstones for entries physically still in the heap but logically
    /// removed; skipped lazily when popped.
    removed: HashSet<JobId>,
}

/// Max-priority-first queue discipline, keyed on `(priority, sequence)` so
/// ties break deterministically by insertion order.
pub struct PriorityQueue {
    state: Mutex<State>,
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                meta: HashMap::new(),
                in_flight: HashSet::new(),
                known: HashSet::new(),
                removed: HashSet::new(),
            }),
        }
    }
}

impl QueueDiscipline for PriorityQueue {
    fn enqueue(
        &self,
        job_id: JobId,
        priority: i64,
        _visible_at: Instant,
        sequence: u64,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        if !state.known.insert(job_id) {
            return Err(QueueError::AlreadyEnqueued(job_id));
        }
        state.meta.insert(job_id, (priority, sequence));
        state.heap.push(Entry {
            priority,
            sequence,
            job_id,
        });
        Ok(())
    }

    fn lease(&self, _now: Instant) -> Option<JobId> {
        let mut state = self.state.lock().unwrap();
        loop {
            let entry = state.heap.pop()?;
            if state.removed.remove(&entry.job_id) {
                continue;
            }
            if !state.known.contains(&entry.job_id) {
                continue;
            }
            state.in_flight.insert(entry.job_id);
            return Some(entry.job_id);
        }
    }

    fn ack(&self, job_id: JobId) {
        let mut state = self.state.lock().unwrap();
        if state.in_flight.remove(&job_id) {
            state.known.remove(&job_id);
            state.meta.remove(&job_id);
        }
    }

    fn nack(&self, job_id: JobId, _visible_at: Instant) {
        let mut state = self.state.lock().unwrap();
        if state.in_flight.remove(&job_id) {
            if let Some(&(priority, sequence)) = state.meta.get(&job_id) {
                state.heap.push(Entry {
                    priority,
                    sequence,
                    job_id,
                });
            }
        }
    }

    fn size(&self) -> QueueCounts {
        let state = self.state.lock().unwrap();
        QueueCounts {
            ready: state.known.len() - state.in_flight.len(),
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
        state.meta.remove(&job_id);
        if !state.in_flight.remove(&job_id) {
            state.removed.insert(job_id);
        }
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
    fn higher_priority_leased_first() {
        let q = PriorityQueue::new();
        let low = JobId::new();
        let high = JobId::new();
        q.enqueue(low, 1, now(), 0).unwrap();
        q.enqueue(high, 10, now(), 1).unwrap();

        assert_eq!(q.lease(now()), Some(high));
        assert_eq!(q.lease(now()), Some(low));
    }

    #[test]
    fn ties_break_by_enqueue_order() {
        let q = PriorityQueue::new();
        let first = JobId::new();
        let second = JobId::new();
        q.enqueue(first, 5, now(), 0).unwrap();
        q.enqueue(second, 5, now(), 1).unwrap();

        assert_eq!(q.lease(now()), Some(first));
        assert_eq!(q.lease(now()), Some(second));
    }

    #[test]
    fn remove_before_lease_skips_tombstoned_entry() {
        let q = PriorityQueue::new();
        let a = JobId::new();
        let b = JobId::new();
        q.enqueue(a, 10, now(), 0).unwrap();
        q.enqueue(b, 1, now(), 1).unwrap();
        q.remove(a).unwrap();

        assert_eq!(q.lease(now()), Some(b));
        assert_eq!(q.lease(now()), None);
    }
}
