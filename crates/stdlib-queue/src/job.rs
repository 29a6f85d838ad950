//! Job record and retry-policy types.
//!
//! Grounded in the `JobRecord`/`JobStatus` split used by reference queue
//! implementations in the wider Rust job-queue ecosystem: a job's identity
//! and payload are immutable, its lifecycle status and attempt bookkeeping
//! are mutated in place as it moves through the store.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ErrorRecord;

/// Opaque job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Opaque queue identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueId(pub String);

impl QueueId {
    pub fn new(name: impl Into<String>) -> Self {
        QueueId(name.into())
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueueId {
    fn from(s: &str) -> Self {
        QueueId::new(s)
    }
}

/// Opaque worker identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    pub fn new() -> Self {
        WorkerId(Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Lifecycle status of a job.
///
/// Valid transitions: `Pending -> Processing -> {Succeeded, Failed,
/// Retrying, DeadLettered}`, `Retrying -> Processing`, and any non-terminal
/// state `-> Cancelled`. Terminal states (`Succeeded`, `Failed`,
/// `DeadLettered`, `Cancelled`) are immutable except for administrative
/// deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Retrying,
    DeadLettered,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::DeadLettered | JobStatus::Cancelled
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
            JobStatus::DeadLettered => "dead_lettered",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Backoff strategy for a retry policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
    ExponentialJitter,
}

/// Per-job-kind retry policy: backoff parameters, attempt cap, and which
/// error categories are retriable.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub strategy: BackoffStrategy,
    pub base: Duration,
    pub cap: Duration,
    pub factor: f64,
    /// Jitter fraction in `[0, 1)`; only meaningful for `ExponentialJitter`.
    pub jitter: f64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::ExponentialJitter,
            base: Duration::from_millis(100),
            cap: Duration::from_secs(60),
            factor: 2.0,
            jitter: 0.2,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            base: delay,
            cap: delay,
            factor: 1.0,
            jitter: 0.0,
            max_attempts,
        }
    }

    pub fn exponential(base: Duration, factor: f64, cap: Duration, max_attempts: u32) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base,
            cap,
            factor,
            jitter: 0.0,
            max_attempts,
        }
    }

    /// Compute the backoff delay for the given 1-based attempt number, using
    /// `rng` to draw the jitter scale when the strategy requires it.
    ///
    /// `rng` returns a uniform sample in `[0, 1)`; the `stdlib-queue-testing`
    /// crate provides a seeded implementation for reproducible tests.
    pub fn backoff(&self, attempt: u32, rng: &mut dyn FnMut() -> f64) -> Duration {
        let attempt = attempt.max(1);
        let raw = match self.strategy {
            BackoffStrategy::Fixed => self.base,
            BackoffStrategy::Linear => self.base.mul_f64(attempt as f64),
            BackoffStrategy::Exponential => {
                let scaled = self.base.mul_f64(self.factor.powi(attempt as i32 - 1));
                scaled.min(self.cap)
            }
            BackoffStrategy::ExponentialJitter => {
                let scaled = self.base.mul_f64(self.factor.powi(attempt as i32 - 1));
                let capped = scaled.min(self.cap);
                let j = self.jitter.clamp(0.0, 0.999);
                let sample = rng().clamp(0.0, 1.0);
                let scale = (1.0 - j) + sample * (2.0 * j);
                capped.mul_f64(scale)
            }
        };
        // Clamped to >= 0 by construction (Duration cannot be negative).
        raw
    }

    /// Whether an error in the given category should be retried, given
    /// `attempt` attempts have already been made.
    pub fn should_retry(&self, category: crate::error::ErrorCategory, retriable: bool, attempt: u32) -> bool {
        retriable && category != crate::error::ErrorCategory::InvalidInput && attempt < self.max_attempts
    }
}

/// A durable record of a job's lifecycle, owned by the [`crate::store::JobStore`]
/// for its entire lifetime. Queues hold only a [`JobId`] reference to it.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub kind: String,
    pub queue: QueueId,
    pub payload: Value,

    pub priority: i64,
    pub visible_at: Instant,
    pub deadline: Option<Instant>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub timeout: Duration,

    pub status: JobStatus,
    pub holder: Option<WorkerId>,
    pub lease_deadline: Option<Instant>,

    pub result: Option<Value>,
    pub error: Option<ErrorRecord>,

    pub enqueued_at: Instant,
    pub attempt_started_at: Option<Instant>,
    pub attempt_finished_at: Option<Instant>,

    /// Monotonic sequence number assigned at enqueue time, used by the
    /// Priority discipline to break ties deterministically.
    pub sequence: u64,
}

impl Job {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: impl Into<String>,
        queue: QueueId,
        payload: Value,
        priority: i64,
        visible_at: Instant,
        deadline: Option<Instant>,
        max_attempts: u32,
        timeout: Duration,
        now: Instant,
        sequence: u64,
    ) -> Self {
        Self {
            id: JobId::new(),
            kind: kind.into(),
            queue,
            payload,
            priority,
            visible_at,
            deadline,
            attempt: 0,
            max_attempts,
            timeout,
            status: JobStatus::Pending,
            holder: None,
            lease_deadline: None,
            result: None,
            error: None,
            enqueued_at: now,
            attempt_started_at: None,
            attempt_finished_at: None,
            sequence,
        }
    }

    pub fn is_visible(&self, now: Instant) -> bool {
        self.visible_at <= now
    }
}
