//! Scenario: a Bounded FIFO queue with capacity 100 and a size-based
//! backpressure strategy that rejects once `ready` exceeds 80. `should_trigger`
//! is checked against `ready` *before* the job that observes it is admitted,
//! so the attempt that sees `ready == 80` still gets in (pushing `ready` to
//! 81); only the next attempt, which observes `ready == 81 > 80`, is
//! rejected. Enqueuing 200 jobs back-to-back (no worker draining) must admit
//! 81 and reject the rest.

use std::sync::Arc;

use serde_json::Value;
use stdlib_queue::backpressure::strategies::SizeBased;
use stdlib_queue::{
    BoundedQueue, Clock, Controller, EventBus, FifoQueue, InMemoryJobStore, JobSpec, OverflowPolicy, Queue,
    QueueError, QueueId, SystemClock,
};

#[tokio::test]
async fn rejects_once_threshold_is_exceeded() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let events = EventBus::default();
    let store = Arc::new(InMemoryJobStore::default());
    let queue_id = QueueId::new("bounded");

    let discipline = BoundedQueue::new(Box::new(FifoQueue::new()), 100, OverflowPolicy::Reject);
    let controller = Controller::new(queue_id.clone(), Box::new(SizeBased::new(80)), events.clone());

    let queue = Queue::new(queue_id, Box::new(discipline), store, events, clock)
        .with_controller(controller);

    let mut admitted = 0;
    let mut rejected = 0;
    for i in 0..200 {
        match queue.enqueue(JobSpec::new("noop", Value::from(i))).await {
            Ok(_) => admitted += 1,
            Err(QueueError::BackpressureRejected { .. }) | Err(QueueError::QueueFull) => rejected += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(admitted, 81, "threshold+1 admits: the attempt observing ready==80 still gets in");
    assert_eq!(rejected, 119);
    assert_eq!(queue.counts().ready, 81);
}
