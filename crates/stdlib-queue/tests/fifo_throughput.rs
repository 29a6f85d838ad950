//! Scenario: 1,000 jobs enqueued into a plain FIFO queue, drained by a pool
//! of 4 workers running instant-success processors. Every job must reach
//! `Succeeded` and none may be processed twice.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use stdlib_queue::{
    Clock, EventBus, FifoQueue, InMemoryJobStore, JobSpec, JobStatus, ProcessorRegistry, Queue, QueueId,
    RoundRobin, SystemClock, WorkerPool,
};
use stdlib_queue_testing::CountingProcessor;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifo_queue_drains_all_jobs_exactly_once() {
    const JOB_COUNT: usize = 1_000;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let events = EventBus::default();
    let store = Arc::new(InMemoryJobStore::default());
    let queue_id = QueueId::new("work");
    let queue = Arc::new(Queue::new(
        queue_id.clone(),
        Box::new(FifoQueue::new()),
        store.clone(),
        events.clone(),
        clock.clone(),
    ));

    for i in 0..JOB_COUNT {
        queue
            .enqueue(JobSpec::new("noop", Value::from(i as u64)))
            .await
            .unwrap();
    }

    let processor = Arc::new(CountingProcessor::new());
    let registry = ProcessorRegistry::new().register("noop", processor.clone());
    let pool = Arc::new(WorkerPool::new(
        vec![queue.clone()],
        Arc::new(RoundRobin::default()),
        registry,
        clock.clone(),
        events,
    ));
    pool.start(4);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let succeeded = store
            .list(&stdlib_queue::JobFilter::for_queue(queue_id.clone()).with_status(JobStatus::Succeeded))
            .len();
        if succeeded == JOB_COUNT {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "jobs did not drain in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    pool.stop(Duration::from_secs(5)).await;

    assert_eq!(processor.count(), JOB_COUNT);
    let counts = queue.counts();
    assert_eq!(counts.ready, 0);
    assert_eq!(counts.in_flight, 0);
}
