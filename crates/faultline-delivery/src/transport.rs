//! Transport seam between the senders and the collector.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status codes whose failures are worth retrying from the backlog.
pub const BACKLOGGABLE_STATUS_CODES: &[u16] = &[400, 403, 408, 409, 420, 429, 500, 502, 504];

/// Collector acknowledgement of a delivered notice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request never produced a response
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("IP is rate limited")]
    RateLimited,

    /// A success status with a body that could not be parsed
    #[error("invalid response body (status {code}): {message}")]
    InvalidBody { code: u16, message: String },
}

impl TransportError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } | Self::InvalidBody { code, .. } => Some(*code),
            Self::Http(_) | Self::RateLimited => None,
        }
    }

    pub fn is_backloggable(&self) -> bool {
        matches!(self, Self::Status { code, .. } if BACKLOGGABLE_STATUS_CODES.contains(code))
    }
}

/// Sends a serialized notice to an endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, body: &str, endpoint: &str) -> Result<Response, TransportError>;
}
