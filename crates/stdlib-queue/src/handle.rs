//! The producer- and worker-facing [`Queue`] facade: binds one
//! [`QueueDiscipline`] to a [`JobStore`], an optional [`Controller`], and an
//! [`EventBus`], and is where the backpressure `Block`/`Throttle` actions and
//! the Bounded discipline's `BlockUntil` overflow policy actually suspend
//! the caller — the sync trait objects underneath only expose a `Notify`
//! handle, they never await anything themselves.

use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::timeout as tokio_timeout;

use crate::backpressure::{Action, Controller, QueueTelemetry, DEFAULT_BLOCK_TIMEOUT};
use crate::clock::SharedClock;
use crate::error::{ErrorRecord, QueueError};
use crate::events::{EventBus, EventKind, EventRecord};
use crate::job::{Job, JobId, QueueId, RetryPolicy, WorkerId};
use crate::queue::{BoundedQueue, OverflowPolicy, QueueCounts, QueueDiscipline};
use crate::store::{JobStore, SequenceCounter};

/// Producer-supplied description of a job to enqueue. `priority` and
/// `delay` are honored only by disciplines that use them (Priority, Delay);
/// other disciplines ignore the fields they don't need.
pub struct JobSpec {
    pub kind: String,
    pub payload: Value,
    pub priority: i64,
    pub delay: Duration,
    pub deadline: Option<Duration>,
    pub max_attempts: Option<u32>,
    pub timeout: Duration,
    /// How long `enqueue` may suspend on a `BoundedQueue` configured with
    /// `OverflowPolicy::BlockUntil` before giving up with `QueueError::QueueFull`.
    pub block_timeout: Duration,
}

impl JobSpec {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            priority: 0,
            delay: Duration::ZERO,
            deadline: None,
            max_attempts: None,
            timeout: Duration::from_secs(30),
            block_timeout: DEFAULT_BLOCK_TIMEOUT,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_block_timeout(mut self, block_timeout: Duration) -> Self {
        self.block_timeout = block_timeout;
        self
    }
}

/// A named queue: one discipline, one backing store, an optional
/// backpressure controller, and the retry policies its job kinds use.
pub struct Queue {
    pub id: QueueId,
    discipline: Box<dyn QueueDiscipline>,
    controller: Option<Controller>,
    store: std::sync::Arc<dyn JobStore>,
    events: EventBus,
    clock: SharedClock,
    sequence: SequenceCounter,
    retry_policies: DashMap<String, RetryPolicy>,
    default_retry_policy: RetryPolicy,
    default_lease_timeout: Duration,
    jitter: StdMutex<fastrand::Rng>,
}

impl Queue {
    pub fn new(
        id: QueueId,
        discipline: Box<dyn QueueDiscipline>,
        store: std::sync::Arc<dyn JobStore>,
        events: EventBus,
        clock: SharedClock,
    ) -> Self {
        Self {
            id,
            discipline,
            controller: None,
            store,
            events,
            clock,
            sequence: SequenceCounter::default(),
            retry_policies: DashMap::new(),
            default_retry_policy: RetryPolicy::default(),
            default_lease_timeout: Duration::from_secs(30),
            jitter: StdMutex::new(fastrand::Rng::new()),
        }
    }

    pub fn with_controller(mut self, controller: Controller) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn with_retry_policy(self, kind: impl Into<String>, policy: RetryPolicy) -> Self {
        self.retry_policies.insert(kind.into(), policy);
        self
    }

    pub fn with_default_lease_timeout(mut self, timeout: Duration) -> Self {
        self.default_lease_timeout = timeout;
        self
    }

    pub fn counts(&self) -> QueueCounts {
        self.discipline.size()
    }

    pub fn retry_policy_for(&self, kind: &str) -> RetryPolicy {
        self.retry_policies
            .get(kind)
            .map(|p| p.clone())
            .unwrap_or_else(|| self.default_retry_policy.clone())
    }

    pub fn jitter_source(&self) -> impl FnMut() -> f64 + '_ {
        move || self.jitter.lock().unwrap().f64()
    }

    pub fn publish(&self, event: EventRecord) {
        self.events.publish(event);
    }

    fn telemetry(&self, now: Instant) -> QueueTelemetry {
        QueueTelemetry {
            counts: self.discipline.size(),
            now,
        }
    }

    /// Admit a job, honoring the queue's backpressure [`Controller`] (if
    /// any) and the underlying discipline's overflow policy (if Bounded).
    ///
    /// `Reject`/`DeadLetter` return immediately; `Block` suspends on the
    /// controller's release notification up to its timeout; `Throttle`
    /// sleeps the prescribed delay once before retrying; `Redirect` is
    /// reported back to the caller as an error carrying the target queue id
    /// so a multi-queue router can re-submit there.
    pub async fn enqueue(&self, spec: JobSpec) -> Result<JobId, QueueError> {
        let now = self.clock.now();
        if let Some(controller) = &self.controller {
            controller.record_arrival(now);
            loop {
                let action = controller.evaluate(&self.telemetry(self.clock.now()));
                match action {
                    Action::Admit => break,
                    Action::Reject => {
                        return Err(QueueError::BackpressureRejected {
                            reason: "queue backpressure strategy rejected enqueue".into(),
                        });
                    }
                    Action::DeadLetter { to } => {
                        return Err(QueueError::BackpressureRejected {
                            reason: format!("routed to dead letter queue {to:?}"),
                        });
                    }
                    Action::Redirect { to } => {
                        return Err(QueueError::BackpressureRejected {
                            reason: format!("redirected to queue {to}"),
                        });
                    }
                    Action::Throttle { delay } => {
                        tokio::time::sleep(delay).await;
                        break;
                    }
                    Action::Block { timeout } => {
                        let notify = controller.release_notify();
                        if tokio_timeout(timeout, notify.notified()).await.is_err() {
                            return Err(QueueError::BackpressureTimeout);
                        }
                    }
                }
            }
        }

        self.admit_to_discipline(spec, now).await
    }

    async fn admit_to_discipline(&self, spec: JobSpec, now: Instant) -> Result<JobId, QueueError> {
        let visible_at = now + spec.delay;
        let deadline = spec.deadline.map(|d| now + d);
        let max_attempts = spec.max_attempts.unwrap_or(self.retry_policy_for(&spec.kind).max_attempts);
        let sequence = self.sequence.next();
        let block_deadline = now + spec.block_timeout;

        let job = Job::new(
            spec.kind,
            self.id.clone(),
            spec.payload,
            spec.priority,
            visible_at,
            deadline,
            max_attempts,
            spec.timeout,
            now,
            sequence,
        );
        let job_id = job.id;

        loop {
            match self.discipline.enqueue(job_id, job.priority, job.visible_at, job.sequence) {
                Ok(()) => break,
                Err(QueueError::QueueFull) => {
                    let Some(notify) = self.bounded_block_notify() else {
                        return Err(QueueError::QueueFull);
                    };
                    let remaining = block_deadline.saturating_duration_since(self.clock.now());
                    if remaining.is_zero() {
                        return Err(QueueError::QueueFull);
                    }
                    if tokio_timeout(remaining, notify.notified()).await.is_err() {
                        return Err(QueueError::QueueFull);
                    }
                    continue;
                }
                Err(other) => return Err(other),
            }
        }

        self.store.put(job)?;
        self.drain_evicted();
        self.publish(EventRecord::new(EventKind::Enqueued, now).with_queue(self.id.clone()).with_job(job_id));
        Ok(job_id)
    }

    fn bounded_block_notify(&self) -> Option<std::sync::Arc<Notify>> {
        // Only meaningful when the discipline is a `BoundedQueue` configured
        // with `OverflowPolicy::BlockUntil`; discovered via downcast since
        // `QueueDiscipline` is otherwise opaque. `Reject` also returns
        // `QueueFull` at capacity but must fail immediately, not block.
        self.discipline
            .as_any()
            .downcast_ref::<BoundedQueue>()
            .filter(|b| b.overflow_policy() == OverflowPolicy::BlockUntil)
            .map(|b| b.capacity_notify())
    }

    fn drain_evicted(&self) {
        if let Some(bounded) = self.discipline.as_any().downcast_ref::<BoundedQueue>() {
            for id in bounded.take_evicted() {
                let _ = self.store.mark_cancelled(id, "overflow", self.clock.now());
            }
        }
    }

    /// Lease the next ready job, if any, setting its store-side holder and
    /// lease deadline. Returns `None` rather than blocking when the queue is
    /// empty — the [`crate::worker::Worker`] loop polls on an interval.
    pub fn try_lease(&self, worker: WorkerId, now: Instant) -> Option<Job> {
        let job_id = self.discipline.lease(now)?;
        let lease_deadline = now + self.default_lease_timeout;
        match self.store.lease(job_id, worker, lease_deadline, now) {
            Ok(job) => {
                self.publish(
                    EventRecord::new(EventKind::Leased, now)
                        .with_queue(self.id.clone())
                        .with_job(job_id)
                        .with_worker(worker)
                        .with_attempt(job.attempt),
                );
                Some(job)
            }
            Err(_) => {
                // Store disagrees with the discipline (e.g. concurrent
                // cancellation); drop the in-flight marker and move on.
                self.discipline.ack(job_id);
                None
            }
        }
    }

    pub fn ack_succeeded(&self, job_id: JobId, result: Value, now: Instant) {
        self.discipline.ack(job_id);
        let _ = self.store.mark_succeeded(job_id, result, now);
        if let Some(controller) = &self.controller {
            if let Some(job) = self.store.get(job_id) {
                if let Some(started) = job.attempt_started_at {
                    controller.record_completion(now, now.saturating_duration_since(started));
                }
            }
        }
    }

    pub fn ack_failed(&self, job_id: JobId, error: ErrorRecord, now: Instant) {
        self.discipline.ack(job_id);
        let _ = self.store.mark_failed(job_id, error, now);
        self.publish(EventRecord::new(EventKind::Failed, now).with_queue(self.id.clone()).with_job(job_id));
    }

    pub fn ack_retry(&self, job_id: JobId, error: ErrorRecord, visible_at: Instant, now: Instant) {
        self.discipline.nack(job_id, visible_at);
        let _ = self.store.mark_retrying(job_id, error, visible_at, now);
        self.publish(EventRecord::new(EventKind::Retried, now).with_queue(self.id.clone()).with_job(job_id));
    }

    pub fn ack_dead_letter(&self, job_id: JobId, error: ErrorRecord, now: Instant) {
        self.discipline.ack(job_id);
        let _ = self.store.mark_dead_lettered(job_id, error, now);
        self.publish(EventRecord::new(EventKind::DeadLettered, now).with_queue(self.id.clone()).with_job(job_id));
    }

    /// Sweep the store for jobs whose lease expired before the worker
    /// holding them could ack/nack, returning them to the discipline with a
    /// fresh backoff delay. Intended to run on an interval from
    /// [`crate::pool::WorkerPool`].
    pub fn reap(&self, now: Instant) -> usize {
        let expired = self.store.list(&crate::store::JobFilter::expired_leases(now));
        let expired: Vec<_> = expired.into_iter().filter(|j| j.queue == self.id).collect();
        let count = expired.len();
        for job in expired {
            let policy = self.retry_policy_for(&job.kind);
            if job.attempt >= policy.max_attempts {
                let error = ErrorRecord {
                    category: crate::error::ErrorCategory::Timeout,
                    message: "lease expired and retries exhausted".into(),
                    retriable: false,
                };
                self.discipline.ack(job.id);
                let _ = self.store.mark_dead_lettered(job.id, error, now);
                self.publish(EventRecord::new(EventKind::DeadLettered, now).with_queue(self.id.clone()).with_job(job.id));
            } else {
                let delay = policy.backoff(job.attempt, &mut self.jitter_source());
                let visible_at = now + delay;
                let error = ErrorRecord {
                    category: crate::error::ErrorCategory::Timeout,
                    message: "lease expired before attempt completed".into(),
                    retriable: true,
                };
                self.discipline.nack(job.id, visible_at);
                let _ = self.store.mark_retrying(job.id, error, visible_at, now);
                self.publish(EventRecord::new(EventKind::Retried, now).with_queue(self.id.clone()).with_job(job.id));
            }
        }
        count
    }
}
