//! End-to-end tests for Notifier over HTTP

use std::time::Duration;

use faultline_core::value::Map;
use faultline_core::{ErrorInfo, Frame, Value};
use faultline_delivery::metrics::Outcome;
use faultline_delivery::{DeliveryError, Notifier};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

fn error() -> Vec<ErrorInfo> {
    vec![ErrorInfo::new("ConnectionRefused", "database is down")
        .with_backtrace(vec![Frame::new("/srv/app/src/db.rs", 88, "app::db::connect")])]
}

async fn bodies(server: &MockServer) -> Vec<serde_json::Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| serde_json::from_slice(&r.body).expect("json body"))
        .collect()
}

#[tokio::test]
async fn test_notify_posts_notice_payload() {
    let server = common::setup_notices_mock().await;
    let config = common::config_for(&server)
        .environment("production")
        .app_version("2.0.0")
        .root_directory("/srv/app".into())
        .build();
    let notifier = Notifier::from_config(config).expect("notifier");

    let mut params = Map::new();
    params.insert("order_id".into(), Value::from(1234));
    let promise = notifier.notify(error(), params).await;
    let response = promise.wait().await.expect("delivery failed");
    assert_eq!(response.id.as_deref(), Some("notice-001"));

    let bodies = bodies(&server).await;
    assert_eq!(bodies.len(), 1);
    let notice = &bodies[0];
    assert_eq!(notice["errors"][0]["type"], "ConnectionRefused");
    assert_eq!(
        notice["errors"][0]["backtrace"][0]["file"],
        "/PROJECT_ROOT/src/db.rs"
    );
    assert_eq!(notice["context"]["environment"], "production");
    assert_eq!(notice["context"]["version"], "2.0.0");
    assert_eq!(notice["context"]["notifier"]["name"], "faultline");
    assert_eq!(notice["params"]["order_id"], 1234);

    notifier.close().await.expect("close");
}

#[tokio::test]
async fn test_oversized_notice_is_truncated_before_sending() {
    let server = common::setup_notices_mock().await;
    let notifier = Notifier::from_config(common::config_for(&server).build()).expect("notifier");

    let mut params = Map::new();
    for i in 0..200 {
        params.insert(format!("field_{i}"), Value::from("x".repeat(1_000)));
    }
    notifier
        .notify_sync(error(), params)
        .await
        .expect("delivery failed");

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].body.len() <= 64_000);
}

#[tokio::test]
async fn test_failed_notice_is_retried_from_backlog() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(common::NOTICES_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("try again"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(common::NOTICES_PATH))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "2"})))
        .mount(&server)
        .await;

    let config = common::config_for(&server)
        .backlog_flush_period(Duration::from_millis(100))
        .build();
    let notifier = Notifier::from_config(config).expect("notifier");

    let err = notifier.notify_sync(error(), Map::new()).await.unwrap_err();
    assert!(matches!(err, DeliveryError::Transport(_)));

    tokio::time::sleep(Duration::from_millis(400)).await;
    let bodies = bodies(&server).await;
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0], bodies[1]);

    notifier.close().await.expect("close");
}

#[tokio::test]
async fn test_close_drains_queued_notices() {
    let server = common::setup_notices_mock().await;
    let config = common::config_for(&server).workers(2).queue_size(10).build();
    let notifier = Notifier::from_config(config).expect("notifier");

    let mut promises = Vec::new();
    for _ in 0..5 {
        promises.push(notifier.notify(error(), Map::new()).await);
    }
    notifier.close().await.expect("close");

    assert!(promises.iter().all(|p| p.is_resolved()));
    assert_eq!(server.received_requests().await.unwrap_or_default().len(), 5);
    assert_eq!(notifier.metrics().count(Outcome::Delivered), 5);
}

#[tokio::test]
async fn test_unauthorized_notice_is_not_backlogged() {
    let server = common::setup_failing_mock(401, r#"{"message":"bad key"}"#).await;
    let config = common::config_for(&server)
        .backlog_flush_period(Duration::from_millis(50))
        .build();
    let notifier = Notifier::from_config(config).expect("notifier");

    let err = notifier.notify_sync(error(), Map::new()).await.unwrap_err();
    assert_eq!(err.to_string(), "transport error: status 401: bad key");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.received_requests().await.unwrap_or_default().len(), 1);
}
