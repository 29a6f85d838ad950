//! Error taxonomy for the queue runtime.
//!
//! Every fallible API in this crate returns [`QueueError`]. Worker-internal
//! failures (processor errors, lease expiry recovered by the reaper) never
//! propagate out of the pool: they are recorded on the job and surfaced as
//! events, per the runtime's "terminal failures never raise out of the pool"
//! rule.

use std::fmt;

use crate::job::JobId;

/// Error categories a processor can report for a failed attempt.
///
/// Retriability defaults follow the documented table: `Timeout`/`Transient`
/// are retriable, `InvalidInput`/`Permanent` are not, `Backpressure` is
/// retriable with an elongated backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Timeout,
    InvalidInput,
    Transient,
    Permanent,
    Backpressure,
}

impl ErrorCategory {
    /// Default retriable flag for this category, used when a processor does
    /// not explicitly set one.
    pub fn default_retriable(self) -> bool {
        match self {
            ErrorCategory::Timeout | ErrorCategory::Transient => true,
            ErrorCategory::InvalidInput | ErrorCategory::Permanent => false,
            ErrorCategory::Backpressure => true,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::InvalidInput => "invalid_input",
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Backpressure => "backpressure",
        };
        f.write_str(s)
    }
}

/// A terminal or intermediate error raised by a processor.
#[derive(Debug, Clone)]
pub struct ProcessorError {
    pub category: ErrorCategory,
    pub message: String,
    pub retriable: bool,
}

impl ProcessorError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        let retriable = category.default_retriable();
        Self {
            category,
            message: message.into(),
            retriable,
        }
    }

    pub fn with_retriable(mut self, retriable: bool) -> Self {
        self.retriable = retriable;
        self
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Timeout, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Permanent, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transient, message)
    }
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}

impl std::error::Error for ProcessorError {}

/// Record persisted on a job once it reaches a terminal or retrying state.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub category: ErrorCategory,
    pub message: String,
    pub retriable: bool,
}

impl From<ProcessorError> for ErrorRecord {
    fn from(e: ProcessorError) -> Self {
        Self {
            category: e.category,
            message: e.message,
            retriable: e.retriable,
        }
    }
}

/// Top-level error type returned by every public, fallible API in this crate.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue is at capacity")]
    QueueFull,

    #[error("job {0} is already enqueued")]
    AlreadyEnqueued(JobId),

    #[error("no job found with id {0}")]
    NotFound(JobId),

    #[error("status compare-and-set failed for job {job_id}: expected {expected}, found {actual}")]
    ConflictingStatus {
        job_id: JobId,
        expected: String,
        actual: String,
    },

    #[error("lease for job {0} expired before the attempt completed")]
    LeaseExpired(JobId),

    #[error("enqueue rejected by backpressure controller: {reason}")]
    BackpressureRejected { reason: String },

    #[error("enqueue timed out waiting on backpressure release")]
    BackpressureTimeout,

    #[error("operation timed out")]
    Timeout,

    #[error("processor reported an error: {0}")]
    Processor(#[from] ProcessorError),

    #[error("pool is shutting down, operation rejected")]
    Shutdown,
}

impl QueueError {
    pub fn conflicting_status(
        job_id: JobId,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        QueueError::ConflictingStatus {
            job_id,
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
