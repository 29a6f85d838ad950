//! `stdlib-queue`: an in-process job/queue runtime.
//!
//! A producer enqueues a [`job::Job`] into a [`handle::Queue`], which binds
//! one [`queue::QueueDiscipline`] (FIFO, Priority, Delay, or Bounded) to a
//! [`store::JobStore`], an optional [`backpressure::Controller`], and the
//! shared [`events::EventBus`]. A [`pool::WorkerPool`] runs [`worker::Worker`]
//! tasks that lease jobs, dispatch them to a registered [`worker::Processor`]
//! by `kind`, and resolve the outcome against the job's
//! [`job::RetryPolicy`] — retrying, dead-lettering, or failing it depending
//! on the error category the processor reports.
//!
//! All timing (visibility delays, lease deadlines, backoff, backpressure
//! windows) flows through a [`clock::Clock`], so the whole runtime is
//! deterministically testable under the virtual clock in
//! `stdlib-queue-testing` without ever sleeping in real time.

pub mod backpressure;
pub mod clock;
pub mod error;
pub mod events;
pub mod handle;
pub mod job;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod worker;

pub use backpressure::{Action, Controller, QueueTelemetry, Strategy};
pub use clock::{Clock, SharedClock, SystemClock};
pub use error::{ErrorCategory, ErrorRecord, ProcessorError, QueueError};
pub use events::{EventBus, EventKind, EventRecord};
pub use handle::{JobSpec, Queue};
pub use job::{BackoffStrategy, Job, JobId, JobStatus, QueueId, RetryPolicy, WorkerId};
pub use pool::{PoolStats, WorkerPool};
pub use queue::{BoundedQueue, DelayQueue, FifoQueue, OverflowPolicy, PriorityQueue, QueueCounts, QueueDiscipline};
pub use scheduler::{PriorityOfQueue, QueueSnapshot, RoundRobin, Scheduler, Weighted};
pub use store::{InMemoryJobStore, JobFilter, JobStore};
pub use worker::{Processor, ProcessorRegistry, Worker, WorkerStatus};
