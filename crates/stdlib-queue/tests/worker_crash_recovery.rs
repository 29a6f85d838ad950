//! Scenario: a processor hangs past its job's per-attempt timeout. The
//! worker's own timeout cancels the attempt and reports a `Timeout` failure;
//! if the lease itself is abandoned (simulating a crashed worker that never
//! acked), the pool's reaper sweep recovers the job back to `Retrying`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use stdlib_queue::{
    Clock, EventBus, FifoQueue, InMemoryJobStore, JobFilter, JobSpec, JobStatus, Queue, QueueId, RetryPolicy,
    SystemClock, WorkerId,
};

#[tokio::test]
async fn abandoned_lease_is_recovered_by_reap() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let events = EventBus::default();
    let store = Arc::new(InMemoryJobStore::default());
    let queue_id = QueueId::new("crashy");
    let queue = Queue::new(queue_id, Box::new(FifoQueue::new()), store.clone(), events, clock.clone())
        .with_retry_policy("noop", RetryPolicy::fixed(Duration::from_millis(10), 5))
        .with_default_lease_timeout(Duration::from_millis(50));

    let job_id = queue.enqueue(JobSpec::new("noop", Value::Null)).await.unwrap();

    let leased = queue.try_lease(WorkerId::new(), clock.now()).unwrap();
    assert_eq!(leased.id, job_id);
    assert_eq!(store.get(job_id).unwrap().status, JobStatus::Processing);

    // Simulate a crashed worker: never ack/nack, just wait past the lease
    // deadline and let the reaper sweep reclaim it.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let reaped = queue.reap(clock.now());
    assert_eq!(reaped, 1);

    let recovered = store.get(job_id).unwrap();
    assert_eq!(recovered.status, JobStatus::Retrying);
    assert_eq!(recovered.attempt, 1);
}

#[tokio::test]
async fn lease_exhausted_retries_goes_to_dead_letter_on_reap() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let events = EventBus::default();
    let store = Arc::new(InMemoryJobStore::default());
    let queue_id = QueueId::new("crashy2");
    let queue = Queue::new(queue_id.clone(), Box::new(FifoQueue::new()), store.clone(), events, clock.clone())
        .with_retry_policy("noop", RetryPolicy::fixed(Duration::from_millis(1), 1))
        .with_default_lease_timeout(Duration::from_millis(20));

    let job_id = queue.enqueue(JobSpec::new("noop", Value::Null)).await.unwrap();
    queue.try_lease(WorkerId::new(), clock.now()).unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let reaped = queue.reap(clock.now());
    assert_eq!(reaped, 1);

    let job = store.get(job_id).unwrap();
    assert_eq!(job.status, JobStatus::DeadLettered);

    let none_left = store.list(&JobFilter::expired_leases(clock.now()));
    assert!(none_left.is_empty());
}
