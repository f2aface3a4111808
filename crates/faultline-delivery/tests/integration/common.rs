//! Shared helpers for notices API integration tests
//!
//! Each helper mounts the endpoints a test needs and returns the mock
//! server together with a configuration pointing at it.

use faultline_core::ConfigBuilder;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const PROJECT_ID: u64 = 42;
pub const PROJECT_KEY: &str = "test-project-key";
pub const NOTICES_PATH: &str = "/api/v3/projects/42/notices";

/// Starts a server that accepts every authenticated notice with a 201.
pub async fn setup_notices_mock() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(NOTICES_PATH))
        .and(header("Authorization", format!("Bearer {PROJECT_KEY}").as_str()))
        .and(header("Content-Type", "application/json"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": "notice-001",
            "url": "https://airbrake.io/locate/notice-001"
        })))
        .mount(&server)
        .await;

    server
}

/// Starts a server answering every notice with `status` and `body`.
pub async fn setup_failing_mock(status: u16, body: &str) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(NOTICES_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(&server)
        .await;

    server
}

/// Configuration targeting `server`.
pub fn config_for(server: &MockServer) -> ConfigBuilder {
    ConfigBuilder::new()
        .project_id(PROJECT_ID)
        .project_key(PROJECT_KEY)
        .host(server.uri())
        .timeout_secs(5)
}
