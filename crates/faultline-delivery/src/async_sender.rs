//! Fire-and-forget delivery on the worker pool.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use faultline_core::Notice;
use futures_util::FutureExt;
use tracing::{error, warn};

use crate::pool::{panic_message, Handler, PoolError, WorkerPool};
use crate::sync_sender::SyncSender;
use crate::{DeliveryError, NoticePromise};

/// Unit of work queued by [`AsyncSender::send`].
pub struct WorkItem {
    pub notice: Notice,
    pub promise: NoticePromise,
    pub endpoint: String,
}

/// Runs queued items through the shared [`SyncSender`].
struct DeliveryJob {
    sender: Arc<SyncSender>,
}

#[async_trait]
impl Handler<WorkItem> for DeliveryJob {
    async fn handle(&self, item: WorkItem) -> anyhow::Result<()> {
        let WorkItem {
            notice,
            promise,
            endpoint,
        } = item;
        let delivery = self.sender.send(notice, promise.clone(), &endpoint);
        if let Err(panic) = AssertUnwindSafe(delivery).catch_unwind().await {
            let message = panic_message(panic.as_ref());
            error!(endpoint = %endpoint, panic = %message, "Delivery panicked");
            promise.reject(DeliveryError::Panicked(message));
        }
        Ok(())
    }
}

pub struct AsyncSender {
    pool: WorkerPool<WorkItem>,
    sender: Arc<SyncSender>,
}

impl AsyncSender {
    pub fn new(sender: Arc<SyncSender>, workers: usize, queue_size: usize) -> Self {
        let job = DeliveryJob {
            sender: Arc::clone(&sender),
        };
        Self {
            pool: WorkerPool::new("async-sender", workers, queue_size, Arc::new(job)),
            sender,
        }
    }

    /// Queues the notice for delivery. When the queue is full or closed the
    /// promise is rejected right away; it is returned in every case.
    pub fn send(&self, notice: Notice, promise: NoticePromise, endpoint: &str) -> NoticePromise {
        let item = WorkItem {
            notice,
            promise: promise.clone(),
            endpoint: endpoint.to_string(),
        };
        if !self.pool.enqueue(item) {
            let reason = if self.pool.is_closed() {
                DeliveryError::Closed
            } else {
                DeliveryError::CapacityExceeded {
                    queue_size: self.pool.queue_size(),
                }
            };
            promise.reject(reason);
        }
        promise
    }

    pub fn has_workers(&self) -> bool {
        self.pool.has_workers()
    }

    /// Notices waiting for a worker.
    pub fn queued(&self) -> usize {
        self.pool.backlog()
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Drains the queue, then stops the sync sender's backlog. Notices no
    /// worker could deliver are rejected with [`DeliveryError::Closed`].
    pub async fn close(&self) -> Result<(), PoolError> {
        let leftover = self.pool.close().await?;
        if !leftover.is_empty() {
            warn!(count = leftover.len(), "Rejecting notices left undelivered at close");
        }
        for item in leftover {
            item.promise.reject(DeliveryError::Closed);
        }
        self.sender.close();
        Ok(())
    }
}
