//! Deploy notifications.
//!
//! A deploy record tells the collector that a new revision went live in an
//! environment. It is posted once, directly, and never backlogged.

use std::sync::Arc;

use faultline_core::Config;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::http::HttpTransport;
use crate::transport::{Response, Transport};
use crate::DeliveryError;

/// Description of one deploy. Unset fields are left out of the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

pub struct DeployNotifier {
    config: Config,
    /// `None` when the configuration has no usable project id or host
    endpoint: Option<String>,
    transport: Arc<dyn Transport>,
}

impl DeployNotifier {
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Self {
        let endpoint = match config.deploy_endpoint() {
            Ok(url) => Some(url.to_string()),
            Err(e) => {
                if !config.is_ignored_environment() {
                    warn!(error = %e, "Deploy notifier is not configured");
                }
                None
            }
        };
        Self {
            config,
            endpoint,
            transport,
        }
    }

    /// Creates a deploy notifier posting to the configured host over HTTPS.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let transport = HttpTransport::from_config(&config)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Posts `deploy` and waits for the collector's answer. A missing
    /// environment is taken from the configuration.
    pub async fn notify(&self, mut deploy: DeployInfo) -> Result<Response, DeliveryError> {
        if self.config.is_ignored_environment() {
            let environment = self.config.project.environment.clone().unwrap_or_default();
            debug!(environment = %environment, "Environment is ignored, deploy dropped");
            return Err(DeliveryError::IgnoredEnvironment(environment));
        }
        let endpoint = self.endpoint.as_deref().ok_or_else(|| {
            DeliveryError::NotConfigured("project.project_id or project.host is invalid".into())
        })?;

        if deploy.environment.is_none() {
            deploy.environment = self.config.project.environment.clone();
        }
        let body =
            serde_json::to_string(&deploy).map_err(|e| DeliveryError::Notice(e.to_string()))?;

        match self.transport.send(&body, endpoint).await {
            Ok(response) => {
                info!(
                    revision = deploy.revision.as_deref().unwrap_or(""),
                    environment = deploy.environment.as_deref().unwrap_or(""),
                    "Deploy recorded"
                );
                Ok(response)
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Deploy was not recorded");
                Err(e.into())
            }
        }
    }
}

impl std::fmt::Debug for DeployNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployNotifier")
            .field("project_id", &self.config.project.project_id)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;
    use crate::transport::TransportError;
    use faultline_core::ConfigBuilder;

    fn config() -> ConfigBuilder {
        ConfigBuilder::new().project_id(7).project_key("key")
    }

    fn revision(rev: &str) -> DeployInfo {
        DeployInfo {
            revision: Some(rev.to_string()),
            ..DeployInfo::default()
        }
    }

    #[tokio::test]
    async fn test_environment_defaults_from_config() {
        let transport = Arc::new(RecordingTransport::default());
        let notifier = DeployNotifier::new(
            config().environment("staging").build(),
            transport.clone(),
        );

        notifier.notify(revision("abc123")).await.unwrap();

        let (body, endpoint) = &transport.calls()[0];
        assert_eq!(endpoint, "https://airbrake.io/api/v4/projects/7/deploys");
        let doc: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(doc["environment"], "staging");
        assert_eq!(doc["revision"], "abc123");
        assert!(doc.get("username").is_none());
    }

    #[tokio::test]
    async fn test_explicit_environment_is_kept() {
        let transport = Arc::new(RecordingTransport::default());
        let notifier = DeployNotifier::new(
            config().environment("staging").build(),
            transport.clone(),
        );

        let deploy = DeployInfo {
            environment: Some("production".into()),
            ..revision("abc123")
        };
        notifier.notify(deploy).await.unwrap();

        let doc: serde_json::Value = serde_json::from_str(&transport.calls()[0].0).unwrap();
        assert_eq!(doc["environment"], "production");
    }

    #[tokio::test]
    async fn test_ignored_environment_is_rejected() {
        let transport = Arc::new(RecordingTransport::default());
        let notifier = DeployNotifier::new(
            config().environment("test").ignore_environment("test").build(),
            transport.clone(),
        );

        let err = notifier.notify(revision("abc123")).await.unwrap_err();
        assert_eq!(err.to_string(), "environment 'test' is ignored");
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_notifier_rejects() {
        let transport = Arc::new(RecordingTransport::default());
        let notifier = DeployNotifier::new(Config::default(), transport.clone());
        assert!(notifier.endpoint().is_none());

        let err = notifier.notify(revision("abc123")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::NotConfigured(_)));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_is_returned() {
        let transport = Arc::new(RecordingTransport::failing_with(500));
        let notifier = DeployNotifier::new(config().build(), transport.clone());

        let err = notifier.notify(revision("abc123")).await.unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::Transport(TransportError::Status { code: 500, .. })
        ));
    }
}
