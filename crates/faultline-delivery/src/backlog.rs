//! Retry queue for deliveries that failed with a backloggable status.
//!
//! Entries are deduplicated until the next flush. The first accepted entry
//! starts a background task that re-sends the whole queue through the
//! transport every flush period. Entries that fail again are dropped.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::transport::Transport;

/// Maximum number of entries kept between flushes.
pub const BACKLOG_SIZE: usize = 100;

pub const DEFAULT_FLUSH_PERIOD: Duration = Duration::from_secs(120);

/// Shortest accepted flush period; shorter values are raised to it.
pub const MIN_FLUSH_PERIOD: Duration = Duration::from_millis(10);

/// Serialized payload and the endpoint it was meant for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BacklogEntry {
    pub payload: String,
    pub endpoint: String,
}

impl BacklogEntry {
    pub fn new(payload: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Default)]
struct BacklogState {
    queue: VecDeque<BacklogEntry>,
    /// Entries accepted or rejected as duplicates since the last flush
    seen: HashSet<BacklogEntry>,
    flusher: Option<JoinHandle<()>>,
    closed: bool,
}

struct BacklogInner {
    transport: Arc<dyn Transport>,
    flush_period: Duration,
    state: Mutex<BacklogState>,
    cancel: CancellationToken,
}

impl Drop for BacklogInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Cloneable handle; clones share one queue and one flush task.
#[derive(Clone)]
pub struct Backlog {
    inner: Arc<BacklogInner>,
}

impl Backlog {
    pub fn new(transport: Arc<dyn Transport>, flush_period: Duration) -> Self {
        if flush_period < MIN_FLUSH_PERIOD {
            warn!(
                requested_ms = flush_period.as_millis() as u64,
                minimum_ms = MIN_FLUSH_PERIOD.as_millis() as u64,
                "Backlog flush period too short, using the minimum"
            );
        }
        let flush_period = flush_period.max(MIN_FLUSH_PERIOD);
        Self {
            inner: Arc::new(BacklogInner {
                transport,
                flush_period,
                state: Mutex::new(BacklogState::default()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn flush_period(&self) -> Duration {
        self.inner.flush_period
    }

    /// Adds an entry. Returns `false` when it was a duplicate, the backlog
    /// is full, or the backlog is closed.
    pub fn push(&self, entry: BacklogEntry) -> bool {
        let mut state = self.inner.state.lock().unwrap();
        if state.closed {
            debug!(endpoint = %entry.endpoint, "Backlog is closed, entry dropped");
            return false;
        }
        if !state.seen.insert(entry.clone()) {
            return false;
        }
        if state.queue.len() >= BACKLOG_SIZE {
            error!(capacity = BACKLOG_SIZE, endpoint = %entry.endpoint, "Backlog full");
            return false;
        }

        state.queue.push_back(entry);
        self.ensure_flusher(&mut state);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().unwrap().closed
    }

    /// Stops the flush task immediately. Queued entries are abandoned and
    /// later pushes are refused.
    pub fn close(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.closed = true;
        self.inner.cancel.cancel();
        if let Some(flusher) = state.flusher.take() {
            flusher.abort();
        }

        let abandoned = state.queue.len();
        state.queue.clear();
        state.seen.clear();
        debug!(abandoned, "Backlog closed");
    }

    fn ensure_flusher(&self, state: &mut BacklogState) {
        if state.flusher.as_ref().is_some_and(|f| !f.is_finished()) {
            return;
        }
        match Handle::try_current() {
            Ok(runtime) => {
                let task = flush_loop(
                    Arc::downgrade(&self.inner),
                    self.inner.cancel.clone(),
                    self.inner.flush_period,
                );
                state.flusher = Some(runtime.spawn(task));
            }
            Err(_) => warn!("No tokio runtime available, backlog flush not scheduled"),
        }
    }
}

impl std::fmt::Debug for Backlog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backlog")
            .field("len", &self.len())
            .field("flush_period", &self.inner.flush_period)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl BacklogInner {
    /// Re-sends everything queued so far. Returns the number of entries that
    /// failed again.
    ///
    /// Entries stay in the dedup set until their re-send has finished.
    async fn flush(&self) -> usize {
        let entries: Vec<BacklogEntry> = {
            let mut state = self.state.lock().unwrap();
            if state.queue.is_empty() {
                return 0;
            }
            state.queue.drain(..).collect()
        };

        debug!(count = entries.len(), "Flushing backlog");
        let mut failed = 0;
        for entry in &entries {
            if let Err(e) = self.transport.send(&entry.payload, &entry.endpoint).await {
                debug!(endpoint = %entry.endpoint, error = %e, "Backlog entry not delivered");
                failed += 1;
            }
        }
        if failed > 0 {
            warn!(failed, total = entries.len(), "Backlog entries were not flushed");
        }

        // Entries queued while the flush was running wait for the next one.
        let mut state = self.state.lock().unwrap();
        let pending: HashSet<BacklogEntry> = state.queue.iter().cloned().collect();
        state.seen = pending;
        failed
    }
}

async fn flush_loop(inner: Weak<BacklogInner>, cancel: CancellationToken, period: Duration) {
    let mut last_flush = Instant::now();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep_until(last_flush + period) => {}
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = inner.flush() => {}
        }
        last_flush = Instant::now();
    }
    debug!("Backlog flush task stopped");
}

// ============================================================================
// Tests
// ============================================================================
