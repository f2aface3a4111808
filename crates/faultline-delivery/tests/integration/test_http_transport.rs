//! Integration tests for HttpTransport against a mocked notices API

use std::time::Duration;

use faultline_delivery::http::HttpTransport;
use faultline_delivery::transport::{Transport, TransportError};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

fn transport() -> HttpTransport {
    HttpTransport::new(common::PROJECT_KEY, Some(Duration::from_secs(5))).expect("transport")
}

fn url(server: &MockServer) -> String {
    format!("{}{}", server.uri(), common::NOTICES_PATH)
}

#[tokio::test]
async fn test_created_notice_returns_id() {
    let server = common::setup_notices_mock().await;

    let response = transport()
        .send(r#"{"errors":[]}"#, &url(&server))
        .await
        .expect("send failed");

    assert_eq!(response.id.as_deref(), Some("notice-001"));
    assert_eq!(
        response.url.as_deref(),
        Some("https://airbrake.io/locate/notice-001")
    );
}

#[tokio::test]
async fn test_body_is_posted_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(common::NOTICES_PATH))
        .and(body_json(serde_json::json!({"errors": [{"type": "Boom"}]})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let response = transport()
        .send(r#"{"errors":[{"type":"Boom"}]}"#, &url(&server))
        .await
        .expect("send failed");
    assert!(response.id.is_none());
}

#[tokio::test]
async fn test_unauthorized_uses_message() {
    let server = common::setup_failing_mock(401, r#"{"message":"invalid project key"}"#).await;

    let err = transport().send("{}", &url(&server)).await.unwrap_err();
    assert_eq!(
        err,
        TransportError::Status {
            code: 401,
            message: "invalid project key".into()
        }
    );
    assert!(!err.is_backloggable());
}

#[tokio::test]
async fn test_server_error_is_backloggable() {
    let server = common::setup_failing_mock(500, "internal error").await;

    let err = transport().send("{}", &url(&server)).await.unwrap_err();
    assert_eq!(err.status_code(), Some(500));
    assert!(err.is_backloggable());
}

#[tokio::test]
async fn test_too_many_requests_blocks_following_sends() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(common::NOTICES_PATH))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_json(serde_json::json!({"message": "slow down"}))
                .append_header("X-RateLimit-Delay", "60"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport();
    let first = transport.send("{}", &url(&server)).await.unwrap_err();
    assert_eq!(first.status_code(), Some(429));
    assert!(transport.is_rate_limited());

    let second = transport.send("{}", &url(&server)).await.unwrap_err();
    assert_eq!(second, TransportError::RateLimited);
}

#[tokio::test]
async fn test_rate_limit_without_delay_expires_immediately() {
    let server = common::setup_failing_mock(429, r#"{"message":"slow down"}"#).await;

    let transport = transport();
    transport.send("{}", &url(&server)).await.unwrap_err();
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(!transport.is_rate_limited());
}

#[tokio::test]
async fn test_connection_failure_is_http_error() {
    // Nothing listens on port 1.
    let endpoint = format!("http://127.0.0.1:1{}", common::NOTICES_PATH);

    let err = transport().send("{}", &endpoint).await.unwrap_err();
    assert!(matches!(err, TransportError::Http(_)));
}
