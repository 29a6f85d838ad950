//! Processor contract and the per-slot worker loop.
//!
//! A [`Worker`] repeatedly leases a job from a [`crate::handle::Queue`],
//! dispatches it to the [`Processor`] registered for its `kind`, and
//! resolves the outcome against the job's [`crate::job::RetryPolicy`]. It
//! never panics out to its caller: a processor panic is caught at the
//! [`crate::pool::WorkerPool`] boundary, not here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::clock::SharedClock;
use crate::error::{ErrorCategory, ErrorRecord, ProcessorError};
use crate::events::{EventKind, EventRecord};
use crate::handle::Queue;
use crate::job::{Job, WorkerId};
use crate::scheduler::{QueueSnapshot, Scheduler};

/// User-supplied job execution logic, dispatched by `kind`.
///
/// Implementations should respect `cancel`: once it is triggered the
/// attempt's lease deadline has passed (or the pool is draining) and the
/// result will be discarded regardless of what `process` returns.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, payload: Value, cancel: &CancellationToken) -> Result<Value, ProcessorError>;
}

/// Dispatch table mapping a job's `kind` string to the [`Processor`] that
/// handles it, mirroring the teacher crate's command-dispatch registries.
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: impl Into<String>, processor: Arc<dyn Processor>) -> Self {
        self.processors.insert(kind.into(), processor);
        self
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(kind).cloned()
    }
}

/// Point-in-time state of a [`Worker`], exposed via [`crate::pool::WorkerPool::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Leasing,
    Processing,
    Stopping,
    Stopped,
}

/// One worker slot: owns no state across iterations besides its id and
/// status, since all durable state lives in each [`Queue`]'s job store. A
/// worker may serve more than one queue; which one it polls next is decided
/// by the [`Scheduler`] on every idle iteration.
pub struct Worker {
    pub id: WorkerId,
    queues: Vec<Arc<Queue>>,
    scheduler: Arc<dyn Scheduler>,
    registry: ProcessorRegistry,
    clock: SharedClock,
    poll_interval: Duration,
    status: std::sync::atomic::AtomicU8,
}

const STATUS_IDLE: u8 = 0;
const STATUS_LEASING: u8 = 1;
const STATUS_PROCESSING: u8 = 2;
const STATUS_STOPPING: u8 = 3;
const STATUS_STOPPED: u8 = 4;

impl Worker {
    pub fn new(
        queues: Vec<Arc<Queue>>,
        scheduler: Arc<dyn Scheduler>,
        registry: ProcessorRegistry,
        clock: SharedClock,
    ) -> Self {
        Self {
            id: WorkerId::new(),
            queues,
            scheduler,
            registry,
            clock,
            poll_interval: Duration::from_millis(50),
            status: std::sync::atomic::AtomicU8::new(STATUS_IDLE),
        }
    }

    fn pick_queue(&self) -> Option<Arc<Queue>> {
        if self.queues.len() == 1 {
            return Some(Arc::clone(&self.queues[0]));
        }
        let snapshots: Vec<QueueSnapshot> = self
            .queues
            .iter()
            .map(|q| QueueSnapshot {
                id: q.id.clone(),
                counts: q.counts(),
            })
            .filter(|s| s.counts.ready > 0)
            .collect();
        let id = self.scheduler.next_queue(&snapshots)?;
        self.queues.iter().find(|q| q.id == id).map(Arc::clone)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn status(&self) -> WorkerStatus {
        match self.status.load(std::sync::atomic::Ordering::Relaxed) {
            STATUS_IDLE => WorkerStatus::Idle,
            STATUS_LEASING => WorkerStatus::Leasing,
            STATUS_PROCESSING => WorkerStatus::Processing,
            STATUS_STOPPING => WorkerStatus::Stopping,
            _ => WorkerStatus::Stopped,
        }
    }

    fn set_status(&self, status: u8) {
        self.status.store(status, std::sync::atomic::Ordering::Relaxed);
    }

    /// Drive the worker loop until `shutdown` is triggered. On shutdown,
    /// returns once the in-flight attempt (if any) finishes.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                self.set_status(STATUS_STOPPING);
                break;
            }

            self.set_status(STATUS_LEASING);
            let leased = self.pick_queue().and_then(|q| {
                let job = q.try_lease(self.id, self.clock.now());
                job.map(|j| (q, j))
            });
            let Some((queue, job)) = leased else {
                self.set_status(STATUS_IDLE);
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = shutdown.cancelled() => {}
                }
                continue;
            };

            self.set_status(STATUS_PROCESSING);
            self.process_one(&queue, job, &shutdown).await;
        }
        self.set_status(STATUS_STOPPED);
    }

    async fn process_one(&self, queue: &Arc<Queue>, job: Job, shutdown: &CancellationToken) {
        let Some(processor) = self.registry.get(&job.kind) else {
            let error = ErrorRecord {
                category: ErrorCategory::Permanent,
                message: format!("no processor registered for kind `{}`", job.kind),
                retriable: false,
            };
            queue.ack_failed(job.id, error, self.clock.now());
            return;
        };

        let attempt_cancel = CancellationToken::new();
        let timeout = job.timeout;

        let outcome = tokio::select! {
            result = processor.process(job.payload.clone(), &attempt_cancel) => result,
            _ = tokio::time::sleep(timeout) => {
                attempt_cancel.cancel();
                Err(ProcessorError::timeout(format!("attempt exceeded {timeout:?}")))
            }
            _ = shutdown.cancelled() => {
                attempt_cancel.cancel();
                Err(ProcessorError::new(ErrorCategory::Transient, "worker shutting down mid-attempt"))
            }
        };

        let now = self.clock.now();
        match outcome {
            Ok(result) => {
                queue.ack_succeeded(job.id, result, now);
                queue.publish(
                    EventRecord::new(EventKind::Completed, now)
                        .with_job(job.id)
                        .with_worker(self.id)
                        .with_attempt(job.attempt),
                );
            }
            Err(processor_error) => self.resolve_failure(queue, &job, processor_error, now),
        }
    }

    fn resolve_failure(&self, queue: &Arc<Queue>, job: &Job, error: ProcessorError, now: std::time::Instant) {
        let policy = queue.retry_policy_for(&job.kind);
        let should_retry = policy.should_retry(error.category, error.retriable, job.attempt);
        let record: ErrorRecord = error.into();

        if should_retry {
            // `job.attempt` is already the 1-based count including the
            // attempt that just failed (the store increments it on lease),
            // which is exactly the `attempt` the documented backoff formulas
            // key off (`base * factor^(attempt-1)`).
            let delay = policy.backoff(job.attempt, &mut queue.jitter_source());
            let visible_at = now + delay;
            queue.ack_retry(job.id, record, visible_at, now);
        } else if job.attempt >= policy.max_attempts {
            // Retries exhausted: route to the dead-letter queue rather than
            // a bare terminal failure, so it stays inspectable/replayable.
            queue.ack_dead_letter(job.id, record, now);
        } else {
            queue.ack_failed(job.id, record, now);
        }
    }
}
