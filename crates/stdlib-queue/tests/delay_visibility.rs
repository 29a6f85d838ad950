//! Scenario: a job enqueued into a Delay queue with `visible_at = now + 500ms`
//! must not be leasable before that deadline, and must become leasable once
//! a worker polling continuously reaches it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use stdlib_queue::{Clock, DelayQueue, EventBus, InMemoryJobStore, JobSpec, Queue, QueueId, SystemClock};

#[tokio::test]
async fn delayed_job_is_invisible_until_its_deadline() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let events = EventBus::default();
    let store = Arc::new(InMemoryJobStore::default());
    let queue_id = QueueId::new("delayed");
    let queue = Arc::new(Queue::new(
        queue_id,
        Box::new(DelayQueue::new()),
        store,
        events,
        clock.clone(),
    ));

    queue
        .enqueue(JobSpec::new("noop", Value::Null).with_delay(Duration::from_millis(500)))
        .await
        .unwrap();

    let worker_id = stdlib_queue::WorkerId::new();

    // Well before the deadline: must stay invisible.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(queue.try_lease(worker_id, clock.now()).is_none());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(queue.try_lease(worker_id, clock.now()).is_none());

    // Poll past the deadline.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if queue.try_lease(worker_id, clock.now()).is_some() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "job never became visible");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
