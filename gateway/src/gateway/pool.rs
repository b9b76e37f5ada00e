//! Fixed-size pool of dispatch workers.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;

use super::worker::{self, WorkerContext};
use crate::error::BootError;

struct PoolState {
    /// Live workers. Only changed under the pool mutex.
    active: usize,
    next_worker_id: usize,
    handles: Vec<JoinHandle<()>>,
}

/// Decrements the active count when a worker task ends, however it ends.
struct ExitGuard(Arc<Mutex<PoolState>>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        state.active = state.active.saturating_sub(1);
    }
}

/// Pool of long-lived dispatch workers sharing one admission queue.
pub struct WorkerPool {
    max_concurrency: usize,
    state: Arc<Mutex<PoolState>>,
    ctx: Arc<WorkerContext>,
}

impl WorkerPool {
    /// Start `max_concurrency` workers. Must be called inside a tokio runtime.
    pub(crate) fn start(max_concurrency: usize, ctx: Arc<WorkerContext>) -> Result<Self, BootError> {
        if max_concurrency == 0 {
            return Err(BootError::NoWorkers);
        }

        let pool = Self {
            max_concurrency,
            state: Arc::new(Mutex::new(PoolState {
                active: 0,
                next_worker_id: 0,
                handles: Vec::with_capacity(max_concurrency),
            })),
            ctx,
        };

        pool.ensure_workers();
        Ok(pool)
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Top the pool back up to `max_concurrency` workers.
    ///
    /// Idempotent; returns how many workers were started. Does nothing once
    /// shutdown has begun.
    pub fn ensure_workers(&self) -> usize {
        if self.ctx.shutdown.is_cancelled() {
            return 0;
        }

        let mut state = self.lock();
        state.handles.retain(|h| !h.is_finished());

        let needed = self.max_concurrency.saturating_sub(state.active);
        for _ in 0..needed {
            state.next_worker_id += 1;
            let worker_id = state.next_worker_id;
            state.active += 1;

            let ctx = self.ctx.clone();
            let exit = ExitGuard(self.state.clone());
            state.handles.push(tokio::spawn(async move {
                let _exit = exit;
                worker::run(worker_id, ctx).await;
            }));
        }

        if needed > 0 {
            tracing::info!("Started {} dispatch workers ({} max)", needed, self.max_concurrency);
        }
        needed
    }

    /// Live workers.
    pub fn active_count(&self) -> usize {
        self.lock().active
    }

    /// Workers currently forwarding or streaming a request.
    pub fn busy_count(&self) -> usize {
        self.ctx.busy.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Signal every worker to stop and wait for them.
    ///
    /// Workers finish the request they are streaming before they exit.
    pub async fn shutdown(&self) {
        self.ctx.shutdown.cancel();
        let handles = std::mem::take(&mut self.lock().handles);

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Worker task failed: {}", e);
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendClient;
    use crate::gateway::queue::AdmissionQueue;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn context(poll_ms: u64) -> Arc<WorkerContext> {
        Arc::new(WorkerContext {
            queue: Arc::new(AdmissionQueue::new(None)),
            backend: Arc::new(BackendClient::new("http://127.0.0.1:1").unwrap()),
            transform: None,
            poll_interval: Duration::from_millis(poll_ms),
            relay_buffer: 4,
            busy: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        })
    }

    #[tokio::test]
    async fn test_zero_workers_is_a_boot_failure() {
        let result = WorkerPool::start(0, context(50));
        assert!(matches!(result, Err(BootError::NoWorkers)));
    }

    #[tokio::test]
    async fn test_start_fills_pool_and_ensure_is_idempotent() {
        let pool = WorkerPool::start(3, context(50)).unwrap();

        assert_eq!(pool.active_count(), 3);
        assert_eq!(pool.ensure_workers(), 0);
        assert_eq!(pool.active_count(), 3);
        assert_eq!(pool.busy_count(), 0);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_idle_workers_survive_empty_polls() {
        let pool = WorkerPool::start(2, context(10)).unwrap();

        // Several poll ticks with nothing queued.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(pool.active_count(), 2);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_workers() {
        let pool = WorkerPool::start(4, context(5_000)).unwrap();
        pool.shutdown().await;

        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.ensure_workers(), 0);
    }
}
