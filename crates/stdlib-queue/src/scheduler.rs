//! Scheduling policy for which registered queue a worker leases from next,
//! when a single [`crate::pool::WorkerPool`] serves more than one queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::job::QueueId;
use crate::queue::QueueCounts;

/// Per-queue input a [`Scheduler`] uses to pick the next queue to poll.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub id: QueueId,
    pub counts: QueueCounts,
}

/// Chooses which queue a free worker should attempt to lease from next.
///
/// Implementations see only queues with `ready > 0`; an empty `queues` slice
/// means no work is currently available anywhere.
pub trait Scheduler: Send + Sync {
    fn next_queue(&self, queues: &[QueueSnapshot]) -> Option<QueueId>;
}

/// Cycles through queues in registration order, one per call.
#[derive(Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl Scheduler for RoundRobin {
    fn next_queue(&self, queues: &[QueueSnapshot]) -> Option<QueueId> {
        if queues.is_empty() {
            return None;
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % queues.len();
        Some(queues[i].id.clone())
    }
}

/// Picks a queue with probability proportional to a configured static
/// weight, falling back to equal weight for unlisted queues.
pub struct Weighted {
    weights: HashMap<QueueId, u32>,
    default_weight: u32,
    cursor: AtomicUsize,
}

impl Weighted {
    pub fn new(weights: HashMap<QueueId, u32>) -> Self {
        Self {
            weights,
            default_weight: 1,
            cursor: AtomicUsize::new(0),
        }
    }

    fn weight_of(&self, id: &QueueId) -> u32 {
        *self.weights.get(id).unwrap_or(&self.default_weight)
    }
}

impl Scheduler for Weighted {
    fn next_queue(&self, queues: &[QueueSnapshot]) -> Option<QueueId> {
        if queues.is_empty() {
            return None;
        }
        let total: u32 = queues.iter().map(|q| self.weight_of(&q.id)).sum();
        if total == 0 {
            return Some(queues[0].id.clone());
        }
        // Deterministic weighted round robin: advance a cursor through the
        // expanded weight space instead of drawing randomly, so scheduling
        // is reproducible under the virtual clock in tests.
        let position = self.cursor.fetch_add(1, Ordering::Relaxed) as u32 % total;
        let mut acc = 0u32;
        for q in queues {
            acc += self.weight_of(&q.id);
            if position < acc {
                return Some(q.id.clone());
            }
        }
        queues.last().map(|q| q.id.clone())
    }
}

/// Serves queues in strict priority-tier order (lowest tier number first),
/// but guarantees a lower-priority queue is polled at least once every
/// `starvation_fuse` consecutive picks, regardless of higher tiers having
/// ready work.
pub struct PriorityOfQueue {
    tiers: HashMap<QueueId, u32>,
    starvation_fuse: u32,
    picks_since_low_tier: Mutex<u32>,
}

impl PriorityOfQueue {
    pub fn new(tiers: HashMap<QueueId, u32>, starvation_fuse: u32) -> Self {
        Self {
            tiers,
            starvation_fuse,
            picks_since_low_tier: Mutex::new(0),
        }
    }

    fn tier_of(&self, id: &QueueId) -> u32 {
        *self.tiers.get(id).unwrap_or(&u32::MAX)
    }
}

impl Scheduler for PriorityOfQueue {
    fn next_queue(&self, queues: &[QueueSnapshot]) -> Option<QueueId> {
        if queues.is_empty() {
            return None;
        }
        let mut picks = self.picks_since_low_tier.lock().unwrap();

        let top_tier = queues.iter().map(|q| self.tier_of(&q.id)).min().unwrap();
        let has_lower_tier = queues.iter().any(|q| self.tier_of(&q.id) > top_tier);

        if has_lower_tier && *picks + 1 >= self.starvation_fuse {
            *picks = 0;
            let lowest = queues.iter().max_by_key(|q| self.tier_of(&q.id)).unwrap();
            return Some(lowest.id.clone());
        }

        *picks += 1;
        let chosen = queues.iter().filter(|q| self.tier_of(&q.id) == top_tier).next().unwrap();
        Some(chosen.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(id: &str, ready: usize) -> QueueSnapshot {
        QueueSnapshot {
            id: QueueId::new(id),
            counts: QueueCounts {
                ready,
                in_flight: 0,
                delayed: 0,
                capacity: None,
            },
        }
    }

    #[test]
    fn round_robin_cycles() {
        let s = RoundRobin::default();
        let queues = vec![snap("a", 1), snap("b", 1)];
        let first = s.next_queue(&queues).unwrap();
        let second = s.next_queue(&queues).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn priority_of_queue_honors_starvation_fuse() {
        let mut tiers = HashMap::new();
        tiers.insert(QueueId::new("hi"), 0);
        tiers.insert(QueueId::new("lo"), 1);
        let s = PriorityOfQueue::new(tiers, 3);
        let queues = vec![snap("hi", 10), snap("lo", 10)];

        let mut picked_lo = false;
        for _ in 0..3 {
            let chosen = s.next_queue(&queues).unwrap();
            if chosen == QueueId::new("lo") {
                picked_lo = true;
            }
        }
        assert!(picked_lo, "low tier must be served within the starvation fuse window");
    }

    #[test]
    fn empty_queue_list_yields_none() {
        let s = RoundRobin::default();
        assert!(s.next_queue(&[]).is_none());
    }
}
