//! Inference offload pool
//!
//! Runs blocking closures on tokio's blocking threads while a semaphore caps
//! how many of them execute at once. Work that cannot get a slot waits in a
//! FIFO queue; the queue is unbounded unless `max_queued` is set, in which
//! case submissions beyond it fail with `PoolSaturated`.
//!
//! Every submission is driven by its own detached task. Dropping the future
//! returned by [`OffloadPool::submit`] only discards the result: queued work
//! still runs and running work is never interrupted.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info};

use crate::models::{EmbeddingError, EmbeddingResult};

/// Default number of concurrently running inference calls
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_workers: usize,
    pub running: usize,
    pub queued: usize,
    pub closed: bool,
}

/// Bounded pool for blocking work
#[derive(Debug)]
pub struct OffloadPool {
    slots: Arc<Semaphore>,
    max_workers: usize,
    max_queued: Option<usize>,
    queued: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
    in_flight: Arc<InFlight>,
    closed: AtomicBool,
}

/// Accepted submissions that have not finished yet
#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    drained: Notify,
}

/// Counts one submission from acceptance until its driver finishes
struct InFlightGuard(Arc<InFlight>);

impl InFlightGuard {
    fn enter(in_flight: &Arc<InFlight>) -> Self {
        in_flight.count.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(in_flight))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}

impl OffloadPool {
    /// Create a pool with `max_workers` slots and an unbounded queue
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            max_queued: None,
            queued: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(InFlight::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Bound the wait queue. `None` keeps it unbounded.
    pub fn with_max_queued(mut self, max_queued: Option<usize>) -> Self {
        self.max_queued = max_queued;
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run `task` on a pool slot and await its result.
    ///
    /// Errors returned by the task reach the caller unchanged. A panicking
    /// task surfaces as `WorkerFailed`.
    pub async fn submit<F, T>(&self, task: F) -> EmbeddingResult<T>
    where
        F: FnOnce() -> EmbeddingResult<T> + Send + 'static,
        T: Send + 'static,
    {
        // Registered before the closed check so shutdown either sees it or rejects it
        let guard = InFlightGuard::enter(&self.in_flight);
        if self.closed.load(Ordering::SeqCst) {
            return Err(EmbeddingError::PoolClosed);
        }
        self.reserve_queue_place()?;

        let slots = Arc::clone(&self.slots);
        let queued = Arc::clone(&self.queued);
        let running = Arc::clone(&self.running);

        let driver = tokio::spawn(async move {
            let _guard = guard;
            let permit = slots.acquire_owned().await;
            queued.fetch_sub(1, Ordering::SeqCst);
            let permit = permit.map_err(|_| EmbeddingError::PoolClosed)?;

            running.fetch_add(1, Ordering::SeqCst);
            let outcome = tokio::task::spawn_blocking(move || {
                let result = task();
                drop(permit);
                result
            })
            .await;
            running.fetch_sub(1, Ordering::SeqCst);

            outcome.map_err(|e| EmbeddingError::WorkerFailed { error: e.to_string() })?
        });

        match driver.await {
            Ok(result) => result,
            Err(e) => Err(EmbeddingError::WorkerFailed { error: e.to_string() }),
        }
    }

    fn reserve_queue_place(&self) -> EmbeddingResult<()> {
        let limit = match self.max_queued {
            Some(limit) => limit,
            None => {
                self.queued.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
        };

        // Tasks that will get a slot immediately do not count against the limit
        let free = self.slots.available_permits();
        self.queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |queued| {
                (queued < limit + free).then_some(queued + 1)
            })
            .map(|_| ())
            .map_err(|queued| {
                debug!("Offload pool saturated ({} queued)", queued);
                EmbeddingError::PoolSaturated { queued }
            })
    }

    /// Current occupancy
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_workers: self.max_workers,
            running: self.running.load(Ordering::SeqCst),
            queued: self.queued.load(Ordering::SeqCst),
            closed: self.closed.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting work and wait until every accepted submission,
    /// queued or running, has finished.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Draining offload pool");
        loop {
            let drained = self.in_flight.drained.notified();
            if self.in_flight.count.load(Ordering::SeqCst) == 0 {
                break;
            }
            drained.await;
        }
        info!("Offload pool shut down");
    }
}

impl Default for OffloadPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS)
    }
}
