//! Deploy command - Record a deploy with the configured collector

use std::path::Path;

use anyhow::Result;
use clap::Args;
use faultline_core::config::Config;
use faultline_delivery::{DeployInfo, DeployNotifier};
use tracing::info;

use crate::output::Output;

#[derive(Debug, Args)]
pub struct DeployCommand {
    /// Revision that was deployed (commit hash or tag)
    #[arg(long)]
    revision: String,

    /// Environment deployed to; defaults to the configured one
    #[arg(long)]
    environment: Option<String>,

    /// Repository URL
    #[arg(long)]
    repository: Option<String>,

    /// Person or system that ran the deploy
    #[arg(long)]
    username: Option<String>,

    /// Application version
    #[arg(long = "app-version")]
    version: Option<String>,
}

impl DeployCommand {
    pub fn deploy_info(&self) -> DeployInfo {
        DeployInfo {
            environment: self.environment.clone(),
            username: self.username.clone(),
            repository: self.repository.clone(),
            revision: Some(self.revision.clone()),
            version: self.version.clone(),
        }
    }

    pub async fn execute(&self, path: &Path, output: &Output) -> Result<()> {
        let config = Config::load_or_default(path);
        super::ensure_valid(&config, output)?;

        let endpoint = config.deploy_endpoint()?.to_string();
        let notifier = DeployNotifier::from_config(config)?;
        info!(endpoint = %endpoint, revision = %self.revision, "Recording deploy");

        match notifier.notify(self.deploy_info()).await {
            Ok(response) => {
                output.print_json(&serde_json::json!({
                    "success": true,
                    "endpoint": endpoint,
                    "revision": self.revision,
                    "id": response.id,
                }));
                output.success(&format!("Deploy of {} recorded", self.revision));
                Ok(())
            }
            Err(e) => {
                output.print_json(&serde_json::json!({
                    "success": false,
                    "endpoint": endpoint,
                    "error": e.to_string(),
                }));
                output.error(&format!("Deploy was not recorded: {e}"));
                Err(e.into())
            }
        }
    }
}
