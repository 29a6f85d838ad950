//! Scenario: two queues, a high-priority one and a low-priority one, served
//! by a single worker through [`stdlib_queue::PriorityOfQueue`] with a
//! starvation fuse of 32. As long as the low-priority queue has ready work,
//! it must be served at least once every 32 picks even while the
//! high-priority queue is saturated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use stdlib_queue::{
    Clock, EventBus, FifoQueue, InMemoryJobStore, JobSpec, JobStatus, PriorityOfQueue, ProcessorRegistry, Queue,
    QueueId, SystemClock, WorkerPool,
};
use stdlib_queue_testing::CountingProcessor;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn low_priority_queue_is_not_starved() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let events = EventBus::default();
    let store = Arc::new(InMemoryJobStore::default());

    let hi_id = QueueId::new("hi");
    let lo_id = QueueId::new("lo");

    let hi = Arc::new(Queue::new(hi_id.clone(), Box::new(FifoQueue::new()), store.clone(), events.clone(), clock.clone()));
    let lo = Arc::new(Queue::new(lo_id.clone(), Box::new(FifoQueue::new()), store.clone(), events.clone(), clock.clone()));

    // Keep the high-priority queue perpetually saturated relative to the
    // low-priority queue's much smaller backlog.
    for i in 0..500 {
        hi.enqueue(JobSpec::new("noop", Value::from(i)).with_priority(10)).await.unwrap();
    }
    for i in 0..20 {
        lo.enqueue(JobSpec::new("noop", Value::from(i)).with_priority(1)).await.unwrap();
    }

    let mut tiers = HashMap::new();
    tiers.insert(hi_id.clone(), 0);
    tiers.insert(lo_id.clone(), 1);
    let scheduler = Arc::new(PriorityOfQueue::new(tiers, 32));

    let processor = Arc::new(CountingProcessor::new());
    let registry = ProcessorRegistry::new().register("noop", processor.clone());
    let pool = Arc::new(WorkerPool::new(vec![hi.clone(), lo.clone()], scheduler, registry, clock.clone(), events));
    pool.start(1);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let lo_done = store
            .list(&stdlib_queue::JobFilter::for_queue(lo_id.clone()).with_status(JobStatus::Succeeded))
            .len();
        if lo_done == 20 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "low priority queue was starved");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    pool.stop(Duration::from_secs(5)).await;
}
