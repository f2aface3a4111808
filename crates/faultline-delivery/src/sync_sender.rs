//! Direct delivery of one notice.
//!
//! [`SyncSender`] serializes the notice, hands it to the transport and
//! settles the promise. Failures with a backloggable status are queued on
//! the attached [`Backlog`] for a later retry.

use std::sync::Arc;

use faultline_core::Notice;
use tracing::{debug, error};

use crate::backlog::{Backlog, BacklogEntry};
use crate::transport::Transport;
use crate::{DeliveryError, NoticePromise};

pub struct SyncSender {
    transport: Arc<dyn Transport>,
    backlog: Option<Backlog>,
}

impl SyncSender {
    pub fn new(transport: Arc<dyn Transport>, backlog: Option<Backlog>) -> Self {
        Self { transport, backlog }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn backlog(&self) -> Option<&Backlog> {
        self.backlog.as_ref()
    }

    /// Delivers `notice` to `endpoint` and settles `promise` with the
    /// outcome. Returns the same promise.
    pub async fn send(
        &self,
        mut notice: Notice,
        promise: NoticePromise,
        endpoint: &str,
    ) -> NoticePromise {
        let payload = match notice.serialize() {
            Ok(payload) => payload,
            Err(e) => {
                let err = DeliveryError::from(e);
                error!(error = %err, "Notice was not sent");
                promise.reject(err);
                return promise;
            }
        };

        match self.transport.send(&payload, endpoint).await {
            Ok(response) => {
                debug!(endpoint, id = ?response.id, "Notice delivered");
                promise.resolve(response);
            }
            Err(e) => {
                if e.is_backloggable() {
                    if let Some(backlog) = &self.backlog {
                        if backlog.push(BacklogEntry::new(payload, endpoint)) {
                            debug!(endpoint, error = %e, "Notice queued for retry");
                        }
                    }
                }
                promise.reject(DeliveryError::Transport(e));
            }
        }
        promise
    }

    /// Stops the backlog, if any.
    pub fn close(&self) {
        if let Some(backlog) = &self.backlog {
            backlog.close();
        }
    }
}
