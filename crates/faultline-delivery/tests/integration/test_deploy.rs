//! End-to-end tests for DeployNotifier over HTTP

use faultline_delivery::{DeployInfo, DeployNotifier};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn test_deploy_posts_to_v4_api() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v4/projects/42/deploys"))
        .and(header(
            "Authorization",
            format!("Bearer {}", common::PROJECT_KEY).as_str(),
        ))
        .and(body_json(serde_json::json!({
            "environment": "production",
            "username": "deployer",
            "repository": "https://github.com/example/app",
            "revision": "38748467ea579e7ae64f7815452307c9d05e05c5",
            "version": "2.0.0"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "deploy-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let config = common::config_for(&server).environment("production").build();
    let notifier = DeployNotifier::from_config(config).expect("deploy notifier");

    let deploy = DeployInfo {
        environment: None,
        username: Some("deployer".into()),
        repository: Some("https://github.com/example/app".into()),
        revision: Some("38748467ea579e7ae64f7815452307c9d05e05c5".into()),
        version: Some("2.0.0".into()),
    };
    let response = notifier.notify(deploy).await.expect("deploy failed");
    assert_eq!(response.id.as_deref(), Some("deploy-1"));
}
