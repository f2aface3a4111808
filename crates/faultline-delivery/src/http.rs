//! reqwest transport for the notices API
//!
//! Posts the serialized notice with the project key as a bearer token and
//! maps collector responses onto [`Response`] / [`TransportError`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use faultline_delivery::http::HttpTransport;
//! use faultline_delivery::transport::Transport;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let transport = HttpTransport::new("project-key", None)?;
//! let response = transport
//!     .send("{}", "https://airbrake.io/api/v3/projects/1/notices")
//!     .await?;
//! println!("delivered as {:?}", response.id);
//! # Ok(())
//! # }
//! ```

use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use faultline_core::Config;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::transport::{Response, Transport, TransportError};

const USER_AGENT: &str = concat!("faultline/", env!("CARGO_PKG_VERSION"));

/// Header carrying the number of seconds to back off after a 429.
const RATE_LIMIT_DELAY_HEADER: &str = "X-RateLimit-Delay";

/// Longest body excerpt kept in error messages.
const TRUNCATE_LIMIT: usize = 100;

const EMPTY_BODY: &str = "[EMPTY_BODY]";

/// Error payload returned by the collector for rejected notices.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Transport posting notices over HTTPS.
pub struct HttpTransport {
    client: Client,
    project_key: String,
    /// Sends fail fast until this instant after a 429
    rate_limit_reset: Mutex<Option<Instant>>,
}

impl HttpTransport {
    /// Creates a transport authenticating with `project_key`.
    ///
    /// `timeout` bounds both connecting and the whole request.
    pub fn new(project_key: impl Into<String>, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = timeout {
            builder = builder.connect_timeout(timeout).timeout(timeout);
        }
        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            project_key: project_key.into(),
            rate_limit_reset: Mutex::new(None),
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Self::new(
            config.project.project_key.clone().unwrap_or_default(),
            config.timeout(),
        )
    }

    /// Returns true while a previous 429 is still in effect.
    pub fn is_rate_limited(&self) -> bool {
        self.rate_limit_reset
            .lock()
            .unwrap()
            .is_some_and(|reset| Instant::now() < reset)
    }

    fn set_rate_limit(&self, delay: Duration) {
        *self.rate_limit_reset.lock().unwrap() = Some(Instant::now() + delay);
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, body: &str, endpoint: &str) -> Result<Response, TransportError> {
        if self.is_rate_limited() {
            warn!(endpoint, "IP is rate limited, notice not sent");
            return Err(TransportError::RateLimited);
        }

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&self.project_key)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_owned())
            .send()
            .await
            .map_err(|e| {
                error!(endpoint, error = %e, "HTTP error");
                TransportError::Http(e.to_string())
            })?;

        let code = response.status().as_u16();
        let delay = response
            .headers()
            .get(RATE_LIMIT_DELAY_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);
        let text = response.text().await.map_err(|e| {
            error!(endpoint, code, error = %e, "Failed to read response body");
            TransportError::Http(e.to_string())
        })?;

        if code == 429 {
            self.set_rate_limit(Duration::from_secs(delay));
        }
        parse_response(code, &text)
    }
}

/// Maps a collector response onto the delivery outcome.
pub fn parse_response(code: u16, body: &str) -> Result<Response, TransportError> {
    match code {
        200 | 204 => {
            debug!(code, body, "Notice accepted");
            Ok(Response::default())
        }
        201 => {
            let response: Response = serde_json::from_str(body).map_err(|e| {
                error!(code, error = %e, body = %truncated_body(body), "Error while parsing body");
                TransportError::InvalidBody {
                    code,
                    message: e.to_string(),
                }
            })?;
            debug!(code, id = ?response.id, "Notice created");
            Ok(response)
        }
        400 | 401 | 403 | 420 | 429 => {
            let message = serde_json::from_str::<ErrorBody>(body)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| truncated_body(body));
            error!(code, message = %message, "Notice rejected");
            Err(TransportError::Status { code, message })
        }
        _ => {
            let message = truncated_body(body);
            error!(code, body = %message, "Unexpected response code");
            Err(TransportError::Status { code, message })
        }
    }
}

fn truncated_body(body: &str) -> String {
    if body.is_empty() {
        EMPTY_BODY.to_string()
    } else if body.chars().count() > TRUNCATE_LIMIT {
        let mut cut: String = body.chars().take(TRUNCATE_LIMIT).collect();
        cut.push_str("...");
        cut
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_parses_id_and_url() {
        let response = parse_response(201, r#"{"id":"1","url":"https://airbrake.io/locate/1"}"#)
            .expect("201 should parse");
        assert_eq!(response.id.as_deref(), Some("1"));
    }

    #[test]
    fn test_created_with_garbage_body() {
        let err = parse_response(201, "not json").unwrap_err();
        assert!(matches!(err, TransportError::InvalidBody { code: 201, .. }));
    }

    #[test]
    fn test_ok_and_no_content_have_no_id() {
        assert_eq!(parse_response(200, "OK").unwrap(), Response::default());
        assert_eq!(parse_response(204, "").unwrap(), Response::default());
    }

    #[test]
    fn test_client_error_uses_message_field() {
        let err = parse_response(401, r#"{"message":"invalid project key"}"#).unwrap_err();
        assert_eq!(
            err,
            TransportError::Status {
                code: 401,
                message: "invalid project key".into()
            }
        );
    }

    #[test]
    fn test_client_error_without_json_keeps_body() {
        let err = parse_response(400, "bad").unwrap_err();
        assert_eq!(err.status_code(), Some(400));
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn test_unexpected_code_truncates_body() {
        let body = "x".repeat(150);
        match parse_response(503, &body).unwrap_err() {
            TransportError::Status { code, message } => {
                assert_eq!(code, 503);
                assert_eq!(message, format!("{}...", "x".repeat(100)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unexpected_code_with_empty_body() {
        match parse_response(502, "").unwrap_err() {
            TransportError::Status { message, .. } => assert_eq!(message, "[EMPTY_BODY]"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_new_transport_is_not_rate_limited() {
        let transport = HttpTransport::new("key", Some(Duration::from_secs(5))).unwrap();
        assert!(!transport.is_rate_limited());
        transport.set_rate_limit(Duration::from_secs(60));
        assert!(transport.is_rate_limited());
    }
}
