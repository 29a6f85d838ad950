//! Job store: the single source of truth for job lifecycle state.
//!
//! The reference implementation is an in-memory, `dashmap`-backed
//! concurrent map with secondary indexes by status and by queue, matching
//! the teacher crate's preference for `dashmap` over hand-rolled sharded
//! locks. The `JobStore` trait is the storage-agnostic contract; an
//! out-of-tree, networked implementation can replace it entirely as long as
//! it honors the same compare-and-set semantics. Every operation here is
//! non-blocking and returns in bounded time, matching the queue disciplines'
//! contract; a networked store is free to make its own methods `async`
//! behind its own inherent API and adapt into this trait at the boundary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::DashSet;
use serde_json::Value;

use crate::error::{ErrorCategory, ErrorRecord, QueueError};
use crate::job::{Job, JobId, JobStatus, QueueId, WorkerId};

/// Filter predicate for [`JobStore::list`].
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub queue: Option<QueueId>,
    pub status: Option<JobStatus>,
    /// Only jobs `Processing` with a lease deadline strictly before this
    /// instant. Used by the reaper sweep.
    pub lease_expired_before: Option<Instant>,
}

impl JobFilter {
    pub fn for_queue(queue: QueueId) -> Self {
        Self {
            queue: Some(queue),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn expired_leases(before: Instant) -> Self {
        Self {
            lease_expired_before: Some(before),
            ..Default::default()
        }
    }

    fn matches(&self, job: &Job) -> bool {
        if let Some(queue) = &self.queue {
            if &job.queue != queue {
                return false;
            }
        }
        if let Some(status) = self.status {
            if job.status != status {
                return false;
            }
        }
        if let Some(before) = self.lease_expired_before {
            if job.status != JobStatus::Processing {
                return false;
            }
            match job.lease_deadline {
                Some(deadline) if deadline < before => {}
                _ => return false,
            }
        }
        true
    }
}

/// Storage-agnostic contract for job lifecycle persistence.
///
/// Synchronous and bounded-time, like the queue disciplines: the in-memory
/// reference implementation below never blocks since `dashmap` operations
/// are lock-free reads/short-held-lock writes.
///
/// `lease` is the only path to `Processing` and sets holder + lease
/// deadline atomically. Status transitions away from a job's current state
/// are compare-and-set: a caller observing a stale status fails instead of
/// silently clobbering a concurrent writer.
pub trait JobStore: Send + Sync {
    fn put(&self, job: Job) -> Result<(), QueueError>;
    fn get(&self, id: JobId) -> Option<Job>;
    fn list(&self, filter: &JobFilter) -> Vec<Job>;
    fn delete(&self, id: JobId) -> Result<(), QueueError>;

    fn lease(&self, id: JobId, worker: WorkerId, lease_deadline: Instant, now: Instant) -> Result<Job, QueueError>;
    fn release(&self, id: JobId) -> Result<(), QueueError>;

    fn mark_succeeded(&self, id: JobId, result: Value, now: Instant) -> Result<(), QueueError>;
    fn mark_failed(&self, id: JobId, error: ErrorRecord, now: Instant) -> Result<(), QueueError>;
    fn mark_retrying(&self, id: JobId, error: ErrorRecord, visible_at: Instant, now: Instant) -> Result<(), QueueError>;
    fn mark_dead_lettered(&self, id: JobId, error: ErrorRecord, now: Instant) -> Result<(), QueueError>;
    fn mark_cancelled(&self, id: JobId, reason: &str, now: Instant) -> Result<(), QueueError>;
}

/// In-memory reference [`JobStore`]. Concurrent map keyed by job id, plus
/// secondary indexes by status and by queue for `list`.
pub struct InMemoryJobStore {
    jobs: DashMap<JobId, Job>,
    by_status: DashMap<JobStatus, DashSet<JobId>>,
    by_queue: DashMap<QueueId, DashSet<JobId>>,
    retention: Duration,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

impl InMemoryJobStore {
    /// `retention` is how long a terminal record remains queryable before
    /// [`Self::purge_expired`] removes it.
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: DashMap::new(),
            by_status: DashMap::new(),
            by_queue: DashMap::new(),
            retention,
        }
    }

    fn index_insert(&self, job: &Job) {
        self.by_status
            .entry(job.status)
            .or_default()
            .insert(job.id);
        self.by_queue
            .entry(job.queue.clone())
            .or_default()
            .insert(job.id);
    }

    fn index_remove_status(&self, status: JobStatus, id: JobId) {
        if let Some(set) = self.by_status.get(&status) {
            set.remove(&id);
        }
    }

    /// Compare-and-set transition: only applies `mutate` if the job's current
    /// status is accepted by `allowed`; otherwise fails with
    /// `ConflictingStatus` and leaves the record untouched. Guards terminal
    /// writes against a stray `mark_*` clobbering a record a concurrent
    /// writer already finalized.
    fn transition(
        &self,
        id: JobId,
        now: Instant,
        allowed: impl Fn(JobStatus) -> bool,
        expected: &str,
        mutate: impl FnOnce(&mut Job),
    ) -> Result<(), QueueError> {
        let mut entry = self.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        let previous_status = entry.status;
        if !allowed(previous_status) {
            return Err(QueueError::conflicting_status(id, expected, previous_status.name()));
        }
        mutate(&mut entry);
        entry.attempt_finished_at = Some(now);
        let new_status = entry.status;
        drop(entry);
        if previous_status != new_status {
            self.index_remove_status(previous_status, id);
            self.by_status.entry(new_status).or_default().insert(id);
        }
        Ok(())
    }

    /// Purge terminal records whose `attempt_finished_at` is older than the
    /// configured retention window.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let expired: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|entry| {
                entry.status.is_terminal()
                    && entry
                        .attempt_finished_at
                        .is_some_and(|t| now.saturating_duration_since(t) > self.retention)
            })
            .map(|entry| entry.id)
            .collect();
        for id in &expired {
            if let Some((_, job)) = self.jobs.remove(id) {
                self.index_remove_status(job.status, *id);
                if let Some(set) = self.by_queue.get(&job.queue) {
                    set.remove(id);
                }
            }
        }
        expired.len()
    }
}

impl JobStore for InMemoryJobStore {
    fn put(&self, job: Job) -> Result<(), QueueError> {
        if self.jobs.contains_key(&job.id) {
            return Err(QueueError::AlreadyEnqueued(job.id));
        }
        self.index_insert(&job);
        self.jobs.insert(job.id, job);
        Ok(())
    }

    fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.get(&id).map(|e| e.clone())
    }

    fn list(&self, filter: &JobFilter) -> Vec<Job> {
        self.jobs
            .iter()
            .filter(|e| filter.matches(&e))
            .map(|e| e.clone())
            .collect()
    }

    fn delete(&self, id: JobId) -> Result<(), QueueError> {
        let (_, job) = self.jobs.remove(&id).ok_or(QueueError::NotFound(id))?;
        self.index_remove_status(job.status, id);
        if let Some(set) = self.by_queue.get(&job.queue) {
            set.remove(&id);
        }
        Ok(())
    }

    fn lease(&self, id: JobId, worker: WorkerId, lease_deadline: Instant, now: Instant) -> Result<Job, QueueError> {
        let mut entry = self.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if !matches!(entry.status, JobStatus::Pending | JobStatus::Retrying) {
            return Err(QueueError::conflicting_status(id, "pending|retrying", entry.status.name()));
        }
        let previous = entry.status;
        entry.status = JobStatus::Processing;
        entry.holder = Some(worker);
        entry.lease_deadline = Some(lease_deadline);
        entry.attempt += 1;
        entry.attempt_started_at = Some(now);
        let job = entry.clone();
        drop(entry);
        self.index_remove_status(previous, id);
        self.by_status.entry(JobStatus::Processing).or_default().insert(id);
        Ok(job)
    }

    fn release(&self, id: JobId) -> Result<(), QueueError> {
        let mut entry = self.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        entry.holder = None;
        entry.lease_deadline = None;
        Ok(())
    }

    fn mark_succeeded(&self, id: JobId, result: Value, now: Instant) -> Result<(), QueueError> {
        self.transition(
            id,
            now,
            |status| status == JobStatus::Processing,
            "processing",
            |job| {
                job.status = JobStatus::Succeeded;
                job.result = Some(result);
                job.holder = None;
                job.lease_deadline = None;
            },
        )
    }

    fn mark_failed(&self, id: JobId, error: ErrorRecord, now: Instant) -> Result<(), QueueError> {
        self.transition(
            id,
            now,
            |status| status == JobStatus::Processing,
            "processing",
            |job| {
                job.status = JobStatus::Failed;
                job.error = Some(error);
                job.holder = None;
                job.lease_deadline = None;
            },
        )
    }

    fn mark_retrying(&self, id: JobId, error: ErrorRecord, visible_at: Instant, now: Instant) -> Result<(), QueueError> {
        self.transition(
            id,
            now,
            |status| status == JobStatus::Processing,
            "processing",
            |job| {
                job.status = JobStatus::Retrying;
                job.error = Some(error);
                job.visible_at = visible_at;
                job.holder = None;
                job.lease_deadline = None;
            },
        )
    }

    fn mark_dead_lettered(&self, id: JobId, error: ErrorRecord, now: Instant) -> Result<(), QueueError> {
        self.transition(
            id,
            now,
            |status| status == JobStatus::Processing,
            "processing",
            |job| {
                job.status = JobStatus::DeadLettered;
                job.error = Some(error);
                job.holder = None;
                job.lease_deadline = None;
            },
        )
    }

    fn mark_cancelled(&self, id: JobId, reason: &str, now: Instant) -> Result<(), QueueError> {
        let record = ErrorRecord {
            category: ErrorCategory::Permanent,
            message: reason.to_string(),
            retriable: false,
        };
        self.transition(
            id,
            now,
            |status| !status.is_terminal(),
            "non-terminal",
            |job| {
                job.status = JobStatus::Cancelled;
                job.error = Some(record);
                job.holder = None;
                job.lease_deadline = None;
            },
        )
    }
}

/// Monotonic sequence generator for Priority-queue tiebreaks, shared across
/// every queue a producer enqueues into.
#[derive(Default)]
pub struct SequenceCounter(AtomicU64);

impl SequenceCounter {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::QueueId;

    fn sample_job(queue: &str) -> Job {
        Job::new(
            "test",
            QueueId::new(queue),
            Value::Null,
            0,
            Instant::now(),
            None,
            5,
            Duration::from_secs(1),
            Instant::now(),
            0,
        )
    }

    #[test]
    fn lease_is_compare_and_set() {
        let store = InMemoryJobStore::default();
        let job = sample_job("q");
        let id = job.id;
        store.put(job).unwrap();

        let worker = WorkerId::new();
        let now = Instant::now();
        store.lease(id, worker, now + Duration::from_secs(1), now).unwrap();

        // Leasing again while already Processing must fail.
        let err = store
            .lease(id, worker, now + Duration::from_secs(1), now)
            .unwrap_err();
        assert!(matches!(err, QueueError::ConflictingStatus { .. }));
    }

    #[test]
    fn second_mark_succeeded_on_terminal_job_is_rejected() {
        let store = InMemoryJobStore::default();
        let job = sample_job("q");
        let id = job.id;
        store.put(job).unwrap();
        let now = Instant::now();
        store.lease(id, WorkerId::new(), now + Duration::from_secs(1), now).unwrap();
        store.mark_succeeded(id, Value::Null, now).unwrap();
        assert_eq!(store.get(id).unwrap().status, JobStatus::Succeeded);

        // A stray second ack must not clobber the terminal record.
        let err = store.mark_succeeded(id, Value::Null, now).unwrap_err();
        assert!(matches!(err, QueueError::ConflictingStatus { .. }));
        assert_eq!(store.get(id).unwrap().status, JobStatus::Succeeded);
    }

    #[test]
    fn list_filters_by_queue_and_status() {
        let store = InMemoryJobStore::default();
        let a = sample_job("q1");
        let b = sample_job("q2");
        store.put(a.clone()).unwrap();
        store.put(b.clone()).unwrap();

        let results = store.list(&JobFilter::for_queue(QueueId::new("q1")));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, a.id);
    }

    #[test]
    fn purge_expired_removes_old_terminal_jobs() {
        let store = InMemoryJobStore::new(Duration::from_millis(1));
        let job = sample_job("q");
        let id = job.id;
        store.put(job).unwrap();
        let now = Instant::now();
        store.lease(id, WorkerId::new(), now + Duration::from_secs(1), now).unwrap();
        store.mark_succeeded(id, Value::Null, now).unwrap();

        let later = now + Duration::from_millis(50);
        assert_eq!(store.purge_expired(later), 1);
        assert!(store.get(id).is_none());
    }
}
