//! Faultline Delivery - Getting notices to the collector
//!
//! Provides:
//! - A bounded worker pool that never blocks the caller
//! - Synchronous and asynchronous senders settling a [`NoticePromise`]
//! - A deduplicating retry backlog flushed on a timer
//! - The [`notifier::Notifier`] orchestrator tying filters, senders and
//!   metrics together
//! - Deploy notifications through [`deploy::DeployNotifier`]
//!
//! ## Modules
//!
//! - [`transport`] - Transport seam and the collector response
//! - [`http`] - reqwest-based transport for the notices API
//! - [`pool`] - Generic worker pool with backpressure
//! - [`backlog`] - Retry queue for backloggable failures

pub mod async_sender;
pub mod backlog;
pub mod deploy;
pub mod http;
pub mod metrics;
pub mod notifier;
pub mod pool;
pub mod sync_sender;
pub mod transport;

use faultline_core::notice::NoticeError;
use faultline_core::Promise;
use thiserror::Error;

pub use deploy::{DeployInfo, DeployNotifier};
pub use notifier::Notifier;
pub use transport::{Response, Transport, TransportError};

/// Promise settled with the outcome of one delivery.
pub type NoticePromise = Promise<Response, DeliveryError>;

/// Reasons a notice was not delivered.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The worker queue was full
    #[error("queue is full (capacity {queue_size}), notice dropped")]
    CapacityExceeded { queue_size: usize },

    /// A filter ignored the notice
    #[error("{0}")]
    Ignored(String),

    /// The configured environment is in the ignore list
    #[error("environment '{0}' is ignored")]
    IgnoredEnvironment(String),

    #[error("notice could not be truncated below {limit} bytes")]
    TruncationExhausted { limit: usize },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("filter failed: {0}")]
    Filter(String),

    /// No endpoint could be derived from the configuration
    #[error("notifier is not configured: {0}")]
    NotConfigured(String),

    #[error("invalid notice: {0}")]
    Notice(String),

    /// Delivery panicked inside a worker
    #[error("delivery panicked: {0}")]
    Panicked(String),

    /// The notifier or sender has been closed
    #[error("notifier is closed")]
    Closed,
}

impl DeliveryError {
    pub(crate) fn ignored() -> Self {
        Self::Ignored("notice was marked as ignored".to_string())
    }
}

impl From<NoticeError> for DeliveryError {
    fn from(err: NoticeError) -> Self {
        match err {
            NoticeError::Ignored => Self::ignored(),
            NoticeError::TruncationExhausted { limit } => Self::TruncationExhausted { limit },
            other => Self::Notice(other.to_string()),
        }
    }
}
