//! Throttled Copier Job Queue
//!
//! Bounds how many copier processes run at once. The bound (the throttle)
//! comes from `copier.max_concurrent_jobs` and is re-applied on every
//! configuration change event:
//!
//! - **Raising** the limit adds permits immediately.
//! - **Lowering** it retires permits: idle ones right away, busy ones as
//!   their jobs finish. Running jobs are never interrupted; only newly
//!   dispatched jobs see the lower limit.
//!
//! A job holds its permit for its whole lifetime; dropping the permit is the
//! single completion event that frees the slot.

use crate::config::AgentConfig;
use crate::error::AgentError;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;

pub struct JobQueue {
    permits: Arc<Semaphore>,
    /// Currently applied throttle.
    limit: AtomicUsize,
    in_flight: AtomicUsize,
    listener: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    /// Creates a queue with a fixed initial limit and no config listener.
    pub fn new(limit: usize) -> Arc<Self> {
        let limit = limit.max(1);
        Arc::new(Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit: AtomicUsize::new(limit),
            in_flight: AtomicUsize::new(0),
            listener: parking_lot::Mutex::new(None),
        })
    }

    /// Creates a queue whose limit follows the configuration channel.
    pub fn with_config(mut config: watch::Receiver<AgentConfig>) -> Arc<Self> {
        let initial = config.borrow_and_update().copier.max_concurrent_jobs;
        let queue = Self::new(initial);

        let weak = Arc::downgrade(&queue);
        let listener = tokio::spawn(async move {
            while config.changed().await.is_ok() {
                let limit = config.borrow_and_update().copier.max_concurrent_jobs;
                match weak.upgrade() {
                    Some(queue) => queue.set_limit(limit),
                    None => break,
                }
            }
            tracing::debug!("Copier throttle listener stopped");
        });

        *queue.listener.lock() = Some(listener);
        queue
    }

    /// Runs `job` once a concurrency slot is free.
    ///
    /// Safe to call from any number of concurrent callers. Fails with
    /// `ObjectClosed` once the queue has been shut down.
    pub async fn submit<F, T>(&self, job: F) -> Result<T, AgentError>
    where
        F: Future<Output = Result<T, AgentError>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AgentError::ObjectClosed)?;

        let _slot = InFlight::enter(&self.in_flight);
        job.await
    }

    /// Re-applies the throttle without touching dispatched jobs.
    pub fn set_limit(&self, new_limit: usize) {
        let new_limit = new_limit.max(1);
        let old_limit = self.limit.swap(new_limit, Ordering::SeqCst);

        if new_limit == old_limit {
            return;
        }

        tracing::info!(
            "Copier throttle changed: {} -> {}",
            old_limit,
            new_limit
        );

        if new_limit > old_limit {
            self.permits.add_permits(new_limit - old_limit);
            return;
        }

        let excess = old_limit - new_limit;
        let retired = self.permits.forget_permits(excess);
        let outstanding = excess - retired;

        if outstanding > 0 {
            // Retire the rest as running jobs hand their permits back.
            let permits = self.permits.clone();
            tokio::spawn(async move {
                if let Ok(permit) = permits.acquire_many(outstanding as u32).await {
                    permit.forget();
                }
            });
        }
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Unregisters the config listener, then closes the queue. Jobs already
    /// running finish normally; waiting submissions fail with `ObjectClosed`.
    pub fn shutdown(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        self.permits.close();
        tracing::info!("Copier job queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
