pub mod config;
pub mod deploy;

use anyhow::Result;
use faultline_core::config::Config;
use tracing::warn;

use crate::output::Output;

/// Reports every validation error and fails when there is at least one.
pub(crate) fn ensure_valid(config: &Config, output: &Output) -> Result<()> {
    let errors = config.validate();
    if errors.is_empty() {
        return Ok(());
    }
    for error in &errors {
        warn!(field = %error.field, message = %error.message, "Invalid configuration");
    }
    output.print_json(&serde_json::json!({
        "success": false,
        "errors": errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
    }));
    output.error("Configuration is invalid, run 'faultline config validate'");
    anyhow::bail!("invalid configuration");
}
