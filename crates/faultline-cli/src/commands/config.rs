//! Config command - View and validate the notifier configuration
//!
//! Provides the `faultline config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON), with the project
//!    key masked
//! 2. Validates the configuration file and reports every error found

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use faultline_core::config::Config;
use tracing::info;

use crate::output::Output;

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current configuration
    Show,
    /// Validate configuration file
    Validate,
}

impl ConfigCommand {
    pub async fn execute(&self, path: &Path, output: &Output) -> Result<()> {
        match self {
            ConfigCommand::Show => execute_show(path, output),
            ConfigCommand::Validate => execute_validate(path, output),
        }
    }
}

fn execute_show(path: &Path, output: &Output) -> Result<()> {
    let config = masked(Config::load_or_default(path));
    info!(config_path = %path.display(), "Showing configuration");

    if output.is_json() {
        let json =
            serde_json::to_value(&config).context("Failed to serialize configuration to JSON")?;
        output.print_json(&json);
    } else {
        output.success(&format!("Configuration ({})", path.display()));
        output.info("");
        let yaml =
            serde_yaml::to_string(&config).context("Failed to serialize configuration to YAML")?;
        for line in yaml.lines() {
            output.info(line);
        }
    }
    Ok(())
}

fn execute_validate(path: &Path, output: &Output) -> Result<()> {
    let config = match Config::load(path) {
        Ok(config) => config,
        Err(e) => {
            let reason = if path.exists() {
                format!("Failed to parse configuration: {e:#}")
            } else {
                "Configuration file not found".to_string()
            };
            output.print_json(&serde_json::json!({
                "valid": false,
                "config_path": path.display().to_string(),
                "errors": [reason],
            }));
            output.error(&reason);
            output.info(&format!("File: {}", path.display()));
            anyhow::bail!("invalid configuration");
        }
    };

    info!(config_path = %path.display(), "Validating configuration");
    let errors = config.validate();

    output.print_json(&serde_json::json!({
        "valid": errors.is_empty(),
        "config_path": path.display().to_string(),
        "errors": errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
    }));

    if errors.is_empty() {
        output.success("Configuration is valid");
        output.info(&format!("File: {}", path.display()));
        return Ok(());
    }

    output.error(&format!(
        "Configuration has {} error{}:",
        errors.len(),
        if errors.len() == 1 { "" } else { "s" }
    ));
    output.info(&format!("File: {}", path.display()));
    for error in &errors {
        output.info(&format!("  {} - {}", error.field, error.message));
    }
    anyhow::bail!("invalid configuration");
}

/// Replaces all but the last four characters of the project key.
fn masked(mut config: Config) -> Config {
    if let Some(key) = config.project.project_key.as_mut() {
        let visible: String = key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        *key = format!("****{visible}");
    }
    config
}
