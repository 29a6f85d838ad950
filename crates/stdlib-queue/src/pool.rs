//! Worker pool: owns a fixed- or variable-size set of [`Worker`] tasks
//! against one or more [`Queue`]s, restarting any that panic and reporting
//! aggregate stats. Mirrors the teacher crate's engine-level supervision:
//! a panicking task is caught at the pool boundary and never takes down the
//! process.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::SharedClock;
use crate::events::{EventBus, EventKind, EventRecord};
use crate::handle::Queue;
use crate::scheduler::Scheduler;
use crate::worker::{ProcessorRegistry, Worker, WorkerStatus};

/// Aggregate, point-in-time view of a pool's workers.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub worker_count: usize,
    pub idle: usize,
    pub processing: usize,
    pub restarts: u64,
    /// Slots that gave up and stopped restarting after exceeding
    /// `max_restarts_per_slot`.
    pub fatal_restarts: usize,
}

struct Slot {
    worker: Arc<Worker>,
    handle: JoinHandle<()>,
}

/// Supervises a set of workers pulling from one or more registered queues.
///
/// `WorkerPool` itself does not pick which queue a worker leases from when
/// more than one is registered — that decision is delegated to a
/// [`Scheduler`], consulted by each worker's outer poll loop before it calls
/// [`Queue::try_lease`].
pub struct WorkerPool {
    queues: Vec<Arc<Queue>>,
    scheduler: Arc<dyn Scheduler>,
    registry: ProcessorRegistry,
    clock: SharedClock,
    events: EventBus,
    shutdown: CancellationToken,
    slots: std::sync::Mutex<Vec<Slot>>,
    restarts: AtomicU64,
    fatal_restarts: AtomicUsize,
    max_restarts_per_slot: u32,
    reap_interval: Duration,
    reaper_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        queues: Vec<Arc<Queue>>,
        scheduler: Arc<dyn Scheduler>,
        registry: ProcessorRegistry,
        clock: SharedClock,
        events: EventBus,
    ) -> Self {
        Self {
            queues,
            scheduler,
            registry,
            clock,
            events,
            shutdown: CancellationToken::new(),
            slots: std::sync::Mutex::new(Vec::new()),
            restarts: AtomicU64::new(0),
            fatal_restarts: AtomicUsize::new(0),
            max_restarts_per_slot: 10,
            reap_interval: Duration::from_millis(200),
            reaper_handle: std::sync::Mutex::new(None),
        }
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Spawn `n` worker tasks and the reaper sweep task.
    pub fn start(self: &Arc<Self>, n: usize) {
        self.spawn_reaper();
        for _ in 0..n {
            self.spawn_slot();
        }
    }

    /// Grow or shrink the live worker count to `n`. Shrinking cancels the
    /// newest slots' shutdown tokens; their in-flight attempt still runs to
    /// completion.
    pub fn resize(self: &Arc<Self>, n: usize) {
        let current = self.slots.lock().unwrap().len();
        if n > current {
            for _ in current..n {
                self.spawn_slot();
            }
        } else {
            let mut slots = self.slots.lock().unwrap();
            for slot in slots.drain(n..) {
                slot.handle.abort();
            }
        }
    }

    fn spawn_slot(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        let worker = Arc::new(Worker::new(
            pool.queues.clone(),
            Arc::clone(&pool.scheduler),
            pool.registry.clone(),
            Arc::clone(&pool.clock),
        ));
        let shutdown = pool.shutdown.clone();
        let worker_for_task = Arc::clone(&worker);
        let pool_for_task = Arc::clone(&pool);

        let handle = tokio::spawn(async move {
            loop {
                let worker = Arc::clone(&worker_for_task);
                let shutdown = shutdown.clone();
                let result = tokio::spawn(async move { worker.run(shutdown).await }).await;

                if shutdown.is_cancelled() {
                    return;
                }
                match result {
                    Ok(()) => return,
                    Err(panic) => {
                        pool_for_task.restarts.fetch_add(1, Ordering::Relaxed);
                        pool_for_task.events.publish(
                            EventRecord::new(EventKind::WorkerRestarted, pool_for_task.clock.now())
                                .with_worker(worker_for_task.id)
                                .with_detail(format!("worker task panicked: {panic}")),
                        );
                        if pool_for_task.restarts.load(Ordering::Relaxed) as u32 > pool_for_task.max_restarts_per_slot
                        {
                            pool_for_task.fatal_restarts.fetch_add(1, Ordering::Relaxed);
                            tracing::error!("worker slot exceeded max restart budget, giving up");
                            return;
                        }
                    }
                }
            }
        });

        self.slots.lock().unwrap().push(Slot { worker, handle });
    }

    fn spawn_reaper(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        let shutdown = pool.shutdown.clone();
        let interval = pool.reap_interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.cancelled() => return,
                }
                let now = pool.clock.now();
                for queue in &pool.queues {
                    let reaped = queue.reap(now);
                    if reaped > 0 {
                        tracing::debug!(queue = %queue.id, count = reaped, "reaped expired leases");
                    }
                }
            }
        });
        *self.reaper_handle.lock().unwrap() = Some(handle);
    }

    /// Request shutdown and wait up to `drain_deadline` for in-flight
    /// attempts to finish before aborting remaining tasks.
    pub async fn stop(&self, drain_deadline: Duration) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = {
            let mut slots = self.slots.lock().unwrap();
            slots.drain(..).map(|s| s.handle).collect()
        };
        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(drain_deadline, drain).await.is_err() {
            tracing::warn!("worker pool drain deadline elapsed, remaining tasks aborted");
        }
        if let Some(handle) = self.reaper_handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub fn stats(&self) -> PoolStats {
        let slots = self.slots.lock().unwrap();
        let idle = slots
            .iter()
            .filter(|s| matches!(s.worker.status(), WorkerStatus::Idle | WorkerStatus::Leasing))
            .count();
        let processing = slots
            .iter()
            .filter(|s| matches!(s.worker.status(), WorkerStatus::Processing))
            .count();
        PoolStats {
            worker_count: slots.len(),
            idle,
            processing,
            restarts: self.restarts.load(Ordering::Relaxed),
            fatal_restarts: self.fatal_restarts.load(Ordering::Relaxed),
        }
    }
}
