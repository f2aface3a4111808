//! # Bounded worker pool with backpressure.
//!
//! [`WorkerPool`] hands items to a fixed number of tokio tasks through one
//! bounded queue shared by all workers.
//!
//! ## Rules
//! - **Non-blocking**: [`WorkerPool::enqueue`] uses `try_send` and returns
//!   `false` when the queue is full or the pool is closed
//! - **FIFO**: items are dequeued in enqueue order
//! - **Isolation**: handler errors and panics are logged per item; the
//!   worker moves on to the next item
//! - **Lazy workers**: tasks are spawned on the ambient runtime on first
//!   use, and respawned when every previous worker has gone away (for
//!   example because the runtime that ran them was shut down)

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Processes one dequeued item.
#[async_trait]
pub trait Handler<T: Send + 'static>: Send + Sync + 'static {
    async fn handle(&self, item: T) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("worker pool is already closed")]
    AlreadyClosed,
}

struct PoolState<T> {
    sender: Option<mpsc::Sender<T>>,
    receiver: Arc<AsyncMutex<mpsc::Receiver<T>>>,
    workers: Vec<JoinHandle<()>>,
    closed: bool,
}

pub struct WorkerPool<T: Send + 'static> {
    name: String,
    worker_count: usize,
    queue_size: usize,
    handler: Arc<dyn Handler<T>>,
    state: Mutex<PoolState<T>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Creates a pool. No task is spawned until the first item arrives or
    /// [`has_workers`](Self::has_workers) is called.
    ///
    /// A `queue_size` of zero is raised to one.
    pub fn new(
        name: impl Into<String>,
        worker_count: usize,
        queue_size: usize,
        handler: Arc<dyn Handler<T>>,
    ) -> Self {
        let queue_size = queue_size.max(1);
        let (sender, receiver) = mpsc::channel(queue_size);
        Self {
            name: name.into(),
            worker_count,
            queue_size,
            handler,
            state: Mutex::new(PoolState {
                sender: Some(sender),
                receiver: Arc::new(AsyncMutex::new(receiver)),
                workers: Vec::new(),
                closed: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Queues `item` without waiting. Returns `false` if the queue is full
    /// or the pool is closed; the item is dropped in both cases.
    pub fn enqueue(&self, item: T) -> bool {
        let sender = match self.state.lock().unwrap().sender.clone() {
            Some(sender) => sender,
            None => {
                debug!(pool = %self.name, "Pool is closed, item dropped");
                return false;
            }
        };

        match sender.try_send(item) {
            Ok(()) => {
                self.ensure_workers();
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                info!(
                    pool = %self.name,
                    queue_size = self.queue_size,
                    "Queue is full, item dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Returns true when the pool is open and at least one worker is alive,
    /// spawning workers first if none are.
    pub fn has_workers(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.ensure_workers();
        self.state
            .lock()
            .unwrap()
            .workers
            .iter()
            .any(|w| !w.is_finished())
    }

    /// Number of items waiting in the queue.
    pub fn backlog(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .sender
            .as_ref()
            .map(|s| s.max_capacity() - s.capacity())
            .unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Stops accepting items, lets the workers drain the queue and waits
    /// for them to exit.
    ///
    /// Items no worker picked up (no runtime, or a `worker_count` of zero)
    /// are returned to the caller in queue order.
    pub async fn close(&self) -> Result<Vec<T>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::AlreadyClosed);
        }
        // Items queued before any worker started still need someone to run them.
        self.ensure_workers();

        let (sender, workers, receiver) = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(PoolError::AlreadyClosed);
            }
            state.closed = true;
            (
                state.sender.take(),
                std::mem::take(&mut state.workers),
                Arc::clone(&state.receiver),
            )
        };

        let pending = sender
            .as_ref()
            .map(|s| s.max_capacity() - s.capacity())
            .unwrap_or(0);
        drop(sender);
        info!(
            pool = %self.name,
            pending,
            workers = workers.len(),
            "Waiting for workers to drain the queue"
        );

        for worker in workers {
            if let Err(e) = worker.await {
                if !e.is_cancelled() {
                    error!(pool = %self.name, error = %e, "Worker terminated abnormally");
                }
            }
        }

        let mut leftover = Vec::new();
        {
            let mut receiver = receiver.lock().await;
            receiver.close();
            while let Ok(item) = receiver.try_recv() {
                leftover.push(item);
            }
        }
        if !leftover.is_empty() {
            warn!(
                pool = %self.name,
                leftover = leftover.len(),
                "Items left in the queue after the workers stopped"
            );
        }

        info!(pool = %self.name, "Worker pool closed");
        Ok(leftover)
    }

    fn ensure_workers(&self) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.workers.retain(|w| !w.is_finished());
        if state.workers.len() >= self.worker_count {
            return;
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(pool = %self.name, "No tokio runtime available, workers not started");
                return;
            }
        };

        while state.workers.len() < self.worker_count {
            let id = state.workers.len();
            let worker = run_worker(
                self.name.clone(),
                id,
                Arc::clone(&state.receiver),
                Arc::clone(&self.handler),
            );
            state.workers.push(runtime.spawn(worker));
        }
        debug!(pool = %self.name, workers = self.worker_count, "Workers started");
    }
}

async fn run_worker<T: Send + 'static>(
    pool: String,
    id: usize,
    receiver: Arc<AsyncMutex<mpsc::Receiver<T>>>,
    handler: Arc<dyn Handler<T>>,
) {
    loop {
        let item = receiver.lock().await.recv().await;
        let Some(item) = item else {
            break;
        };

        match AssertUnwindSafe(handler.handle(item)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(pool = %pool, worker = id, error = %e, "Failed to process item");
            }
            Err(panic) => {
                error!(
                    pool = %pool,
                    worker = id,
                    panic = %panic_message(panic.as_ref()),
                    "Worker panicked while processing item"
                );
            }
        }
    }
    debug!(pool = %pool, worker = id, "Worker stopped");
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl Handler<u32> for Recorder {
        async fn handle(&self, item: u32) -> anyhow::Result<()> {
            if item == 13 {
                panic!("unlucky item");
            }
            if item == 7 {
                anyhow::bail!("rejected item");
            }
            self.seen.lock().unwrap().push(item);
            Ok(())
        }
    }

    fn pool(workers: usize, queue: usize) -> (Arc<Recorder>, WorkerPool<u32>) {
        let recorder = Arc::new(Recorder::default());
        let pool = WorkerPool::new("test", workers, queue, recorder.clone() as Arc<dyn Handler<u32>>);
        (recorder, pool)
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_blocking() {
        let (_recorder, pool) = pool(1, 1);
        assert!(pool.enqueue(1));
        assert!(!pool.enqueue(2));
        assert_eq!(pool.backlog(), 1);
    }

    #[tokio::test]
    async fn test_items_processed_in_order() {
        let (recorder, pool) = pool(1, 10);
        for i in 1..=5 {
            assert!(pool.enqueue(i));
        }
        assert!(pool.close().await.unwrap().is_empty());
        assert_eq!(*recorder.seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_bad_items_do_not_kill_workers() {
        let (recorder, pool) = pool(1, 10);
        for i in [1, 13, 2, 7, 3] {
            assert!(pool.enqueue(i));
        }
        pool.close().await.unwrap();
        assert_eq!(*recorder.seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_multiple_workers_drain_everything() {
        let (recorder, pool) = pool(4, 50);
        for i in 0..40 {
            assert!(pool.enqueue(i + 100));
        }
        pool.close().await.unwrap();
        let mut seen = recorder.seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, (100..140).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_close_twice_and_enqueue_after_close() {
        let (_recorder, pool) = pool(1, 1);
        assert!(pool.has_workers());
        pool.close().await.unwrap();
        assert_eq!(pool.close().await, Err(PoolError::AlreadyClosed));
        assert!(!pool.enqueue(1));
        assert!(!pool.has_workers());
        assert_eq!(pool.backlog(), 0);
    }

    #[tokio::test]
    async fn test_zero_workers_returns_items_on_close() {
        let (recorder, pool) = pool(0, 5);
        for i in 0..3 {
            assert!(pool.enqueue(i));
        }
        assert_eq!(pool.backlog(), 3);
        assert!(!pool.has_workers());
        assert_eq!(pool.close().await.unwrap(), vec![0, 1, 2]);
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_workers_respawn_on_new_runtime() {
        let (recorder, pool) = pool(1, 5);
        let pool = Arc::new(pool);

        let first = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        first.block_on(async { assert!(pool.has_workers()) });
        drop(first);

        let second = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        second.block_on(async {
            assert!(pool.has_workers());
            assert!(pool.enqueue(42));
            pool.close().await.unwrap();
        });
        assert_eq!(*recorder.seen.lock().unwrap(), vec![42]);
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&5u8), "unknown panic");
    }
}
