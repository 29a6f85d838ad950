//! Pluggable backpressure controller.
//!
//! A [`Strategy`] evaluates a queue's live telemetry and decides whether an
//! `enqueue` should be admitted; the [`Controller`] wraps one strategy
//! (itself possibly a [`strategies::Composite`]) with hysteresis, counters,
//! and event publication, matching the `apply`/`should_release` contract
//! and the 0.80 release-threshold factor documented for every strategy.

pub mod strategies;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::events::{EventBus, EventKind, EventRecord};
use crate::job::QueueId;
use crate::metrics::BackpressureCounters;
use crate::queue::QueueCounts;

/// The default factor applied to a strategy's trigger threshold to compute
/// its release threshold, preventing oscillation (hysteresis).
pub const RELEASE_FACTOR: f64 = 0.80;

/// Default cap on how long a `Block` action suspends a caller.
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Live telemetry a strategy evaluates against.
#[derive(Debug, Clone, Copy)]
pub struct QueueTelemetry {
    pub counts: QueueCounts,
    pub now: Instant,
}

/// The action a [`Controller`] selects for an `enqueue` attempt.
#[derive(Debug, Clone)]
pub enum Action {
    Admit,
    Reject,
    Block { timeout: Duration },
    Throttle { delay: Duration },
    Redirect { to: QueueId },
    DeadLetter { to: Option<QueueId> },
}

/// A pluggable backpressure strategy.
///
/// Implementations may hold interior-mutable state (rolling windows,
/// adaptive thresholds) since every method takes `&self` — the controller
/// calls these concurrently with `enqueue`.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this strategy's trigger condition currently holds.
    fn should_trigger(&self, telemetry: &QueueTelemetry) -> bool;

    /// The action to apply once triggered.
    fn apply(&self, telemetry: &QueueTelemetry) -> Action;

    /// Whether this strategy's hysteresis-adjusted release condition holds.
    fn should_release(&self, telemetry: &QueueTelemetry) -> bool;

    /// Record an arrival (enqueue attempt) for strategies that track rate.
    fn record_arrival(&self, _now: Instant) {}

    /// Record a completed attempt's processing latency.
    fn record_completion(&self, _now: Instant, _latency: Duration) {}
}

struct ActiveState {
    strategy_name: &'static str,
    action: Action,
    applied_at: Instant,
    /// When the release predicate first started holding continuously.
    release_since: Option<Instant>,
}

/// Evaluates a [`Strategy`] against a queue's telemetry and produces an
/// [`Action`] at enqueue time, applying hysteresis and publishing events.
pub struct Controller {
    queue_id: QueueId,
    strategy: Box<dyn Strategy>,
    state: Mutex<Option<ActiveState>>,
    counters: Mutex<BackpressureCounters>,
    events: EventBus,
    sweep_interval: Duration,
    release_notify: Arc<Notify>,
    secondary_queue: Option<QueueId>,
    dead_letter_queue: Option<QueueId>,
}

impl Controller {
    pub fn new(queue_id: QueueId, strategy: Box<dyn Strategy>, events: EventBus) -> Self {
        Self {
            queue_id,
            strategy,
            state: Mutex::new(None),
            counters: Mutex::new(BackpressureCounters::default()),
            events,
            sweep_interval: Duration::from_millis(100),
            release_notify: Arc::new(Notify::new()),
            secondary_queue: None,
            dead_letter_queue: None,
        }
    }

    pub fn with_redirect_target(mut self, queue_id: QueueId) -> Self {
        self.secondary_queue = Some(queue_id);
        self
    }

    pub fn with_dead_letter_target(mut self, queue_id: QueueId) -> Self {
        self.dead_letter_queue = Some(queue_id);
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn release_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.release_notify)
    }

    pub fn counters(&self) -> BackpressureCounters {
        *self.counters.lock().unwrap()
    }

    pub fn record_arrival(&self, now: Instant) {
        self.strategy.record_arrival(now);
    }

    pub fn record_completion(&self, now: Instant, latency: Duration) {
        self.strategy.record_completion(now, latency);
    }

    /// Evaluate the controller for one `enqueue` attempt, returning the
    /// action the caller must enforce.
    pub fn evaluate(&self, telemetry: &QueueTelemetry) -> Action {
        let mut guard = self.state.lock().unwrap();
        match guard.as_mut() {
            Some(active) => {
                if self.strategy.should_release(telemetry) {
                    let since = *active.release_since.get_or_insert(telemetry.now);
                    if telemetry.now.saturating_duration_since(since) >= self.sweep_interval {
                        let name = active.strategy_name;
                        *guard = None;
                        drop(guard);
                        self.publish(EventKind::BackpressureReleased, telemetry.now, name);
                        self.release_notify.notify_waiters();
                        return Action::Admit;
                    }
                } else {
                    active.release_since = None;
                }
                let action = active.action.clone();
                drop(guard);
                self.enforce(action, telemetry)
            }
            None => {
                if self.strategy.should_trigger(telemetry) {
                    let action = self.strategy.apply(telemetry);
                    *guard = Some(ActiveState {
                        strategy_name: self.strategy.name(),
                        action: action.clone(),
                        applied_at: telemetry.now,
                        release_since: None,
                    });
                    drop(guard);
                    self.publish(EventKind::BackpressureApplied, telemetry.now, self.strategy.name());
                    self.enforce(action, telemetry)
                } else {
                    Action::Admit
                }
            }
        }
    }

    fn enforce(&self, action: Action, telemetry: &QueueTelemetry) -> Action {
        let (kind, counter_field): (EventKind, fn(&mut BackpressureCounters)) = match &action {
            Action::Reject => (EventKind::BackpressureRejected, |c| c.rejected += 1),
            Action::Block { .. } => (EventKind::BackpressureBlocked, |c| c.blocked += 1),
            Action::Throttle { .. } => (EventKind::BackpressureThrottled, |c| c.throttled += 1),
            Action::Redirect { .. } => (EventKind::BackpressureRedirected, |c| c.redirected += 1),
            Action::DeadLetter { .. } => (EventKind::DeadLettered, |_| {}),
            Action::Admit => return Action::Admit,
        };
        counter_field(&mut self.counters.lock().unwrap());
        self.publish(kind, telemetry.now, self.strategy.name());

        match action {
            Action::Redirect { .. } => match &self.secondary_queue {
                Some(q) => Action::Redirect { to: q.clone() },
                None => Action::Reject,
            },
            Action::DeadLetter { .. } => Action::DeadLetter {
                to: self.dead_letter_queue.clone(),
            },
            Action::Block { timeout } => Action::Block {
                timeout: if timeout == Duration::ZERO {
                    DEFAULT_BLOCK_TIMEOUT
                } else {
                    timeout
                },
            },
            other => other,
        }
    }

    fn publish(&self, kind: EventKind, now: Instant, detail: &str) {
        self.events.publish(
            EventRecord::new(kind, now)
                .with_queue(self.queue_id.clone())
                .with_detail(detail.to_string()),
        );
    }
}
