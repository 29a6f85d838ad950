//! Deterministic test doubles for `stdlib-queue`: a manually-advanced
//! [`ManualClock`], scripted [`Processor`] implementations, a seeded jitter
//! source, and an [`EventRecorder`] that drains a queue's [`EventBus`] into
//! an assertable log, mirroring the teacher framework's `testing` module
//! (`SpyJobQueue`, `MockJobStore`, `EventLatch`) adapted to this runtime's
//! job/queue types instead of its event-sourcing machines.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use stdlib_queue::{Clock, EventBus, EventKind, EventRecord, ProcessorError};

/// A [`Clock`] whose `now()` only moves when the test calls [`ManualClock::advance`].
///
/// Every timing decision in `stdlib-queue` (delay visibility, backoff, lease
/// expiry, backpressure windows) is computed from `Clock::now()`, so tests
/// can drive an entire scenario — including multi-step retry backoff and
/// lease-expiry recovery — without ever sleeping in real time.
pub struct ManualClock {
    base: Instant,
    offset_nanos: AtomicI64,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            base: Instant::now(),
            offset_nanos: AtomicI64::new(0),
        })
    }

    /// Advance the clock by `duration`, returning the new `now()`.
    pub fn advance(&self, duration: Duration) -> Instant {
        self.offset_nanos
            .fetch_add(duration.as_nanos() as i64, Ordering::SeqCst);
        self.now()
    }

    /// Advance the clock until it is at least `target`. A no-op if `target`
    /// is not after the current time.
    pub fn advance_to(&self, target: Instant) {
        let current = self.now();
        if target > current {
            self.advance(target.saturating_duration_since(current));
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst).max(0) as u64)
    }
}

/// A reproducible `[0, 1)` sample source for [`stdlib_queue::RetryPolicy::backoff`]'s
/// jitter draw, backed by a seeded `fastrand::Rng` so two runs with the same
/// seed produce the same backoff sequence.
pub fn seeded_jitter(seed: u64) -> impl FnMut() -> f64 {
    let rng = fastrand::Rng::with_seed(seed);
    move || rng.f64()
}

/// One scripted outcome for [`ScriptedProcessor`].
#[derive(Clone)]
pub enum Outcome {
    Succeed(Value),
    Fail(ProcessorErrorSpec),
    /// Sleep past the caller-supplied timeout, ignoring cancellation —
    /// exercises the documented "processor ignores cancellation" trade-off.
    HangPast(Duration),
}

/// Serializable description of a [`ProcessorError`], since `ProcessorError`
/// itself is not `Clone`-free of its message ownership concerns.
#[derive(Clone)]
pub struct ProcessorErrorSpec {
    pub category: stdlib_queue::ErrorCategory,
    pub message: String,
    pub retriable: Option<bool>,
}

impl ProcessorErrorSpec {
    pub fn new(category: stdlib_queue::ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            retriable: None,
        }
    }

    fn into_error(self) -> ProcessorError {
        let err = ProcessorError::new(self.category, self.message);
        match self.retriable {
            Some(r) => err.with_retriable(r),
            None => err,
        }
    }
}

/// A [`Processor`](stdlib_queue::Processor) that replays a fixed script of
/// [`Outcome`]s, one per attempt, holding on the last entry once the script
/// is exhausted. Used to deterministically exercise retry-then-succeed and
/// retry-exhaustion scenarios without real failure injection.
pub struct ScriptedProcessor {
    script: Mutex<VecDeque<Outcome>>,
    last: Mutex<Option<Outcome>>,
    attempts: AtomicUsize,
}

impl ScriptedProcessor {
    pub fn new(script: impl IntoIterator<Item = Outcome>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Convenience constructor: fail `failures` times with the given error
    /// spec, then succeed with `result`.
    pub fn fail_then_succeed(failures: usize, error: ProcessorErrorSpec, result: Value) -> Self {
        let mut script: Vec<Outcome> = (0..failures).map(|_| Outcome::Fail(error.clone())).collect();
        script.push(Outcome::Succeed(result));
        Self::new(script)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> Outcome {
        let mut script = self.script.lock().unwrap();
        if let Some(outcome) = script.pop_front() {
            *self.last.lock().unwrap() = Some(outcome.clone());
            outcome
        } else {
            self.last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(Outcome::Succeed(Value::Null))
        }
    }
}

#[async_trait]
impl stdlib_queue::Processor for ScriptedProcessor {
    async fn process(&self, _payload: Value, cancel: &CancellationToken) -> Result<Value, ProcessorError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.next_outcome() {
            Outcome::Succeed(v) => Ok(v),
            Outcome::Fail(spec) => Err(spec.into_error()),
            Outcome::HangPast(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => Ok(Value::Null),
                    _ = cancel.cancelled() => {
                        // Documented trade-off: a processor that ignores
                        // cancellation keeps running; this one honors it for
                        // the "cooperative" test path, but reports the same
                        // sleep either way so the caller only sees the
                        // worker's own timeout failure.
                        tokio::time::sleep(duration).await;
                        Ok(Value::Null)
                    }
                }
            }
        }
    }
}

/// A [`Processor`](stdlib_queue::Processor) that always succeeds with the
/// payload it was given, incrementing a shared counter. Used for plain
/// throughput scenarios where the outcome doesn't matter, only that every
/// job ran exactly once.
#[derive(Default)]
pub struct CountingProcessor {
    count: AtomicUsize,
}

impl CountingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl stdlib_queue::Processor for CountingProcessor {
    async fn process(&self, payload: Value, _cancel: &CancellationToken) -> Result<Value, ProcessorError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(payload)
    }
}

/// Drains an [`EventBus`] subscription into an in-memory, queryable log.
///
/// Mirrors the teacher framework's `EventLatch`/`SpyJobQueue` pattern: a
/// background task owns the receiver so slow assertions in the test body
/// never cause the bus itself to lag, and callers can await a specific kind
/// showing up instead of polling.
pub struct EventRecorder {
    events: Arc<Mutex<Vec<EventRecord>>>,
    notify: Arc<Notify>,
    _task: tokio::task::JoinHandle<()>,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus) -> Self {
        let mut rx = bus.subscribe();
        let events = Arc::new(Mutex::new(Vec::new()));
        let notify = Arc::new(Notify::new());
        let events_for_task = Arc::clone(&events);
        let notify_for_task = Arc::clone(&notify);
        let task = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                events_for_task.lock().unwrap().push(event);
                notify_for_task.notify_waiters();
            }
        });
        Self {
            events,
            notify,
            _task: task,
        }
    }

    pub fn all(&self) -> Vec<EventRecord> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().unwrap().iter().filter(|e| e.kind == kind).count()
    }

    /// Poll until at least `n` events of `kind` have been recorded, or
    /// `timeout` elapses (returns `false` on timeout).
    pub async fn wait_for_count(&self, kind: EventKind, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count(kind) >= n {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            let notified = self.notify.notified();
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_monotonically() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        clock.advance(Duration::from_secs(5));
        let t1 = clock.now();
        assert_eq!(t1.saturating_duration_since(t0), Duration::from_secs(5));
    }

    #[test]
    fn seeded_jitter_is_reproducible() {
        let mut a = seeded_jitter(42);
        let mut b = seeded_jitter(42);
        let seq_a: Vec<f64> = (0..5).map(|_| a()).collect();
        let seq_b: Vec<f64> = (0..5).map(|_| b()).collect();
        assert_eq!(seq_a, seq_b);
    }

    #[tokio::test]
    async fn scripted_processor_fails_then_succeeds() {
        let cancel = CancellationToken::new();
        let proc = ScriptedProcessor::fail_then_succeed(
            2,
            ProcessorErrorSpec::new(stdlib_queue::ErrorCategory::Transient, "boom"),
            Value::from(1),
        );
        use stdlib_queue::Processor;
        assert!(proc.process(Value::Null, &cancel).await.is_err());
        assert!(proc.process(Value::Null, &cancel).await.is_err());
        assert!(proc.process(Value::Null, &cancel).await.is_ok());
        assert_eq!(proc.attempts(), 3);
    }
}
