//! Faultline CLI - Inspect configuration and send test notices
//!
//! Provides commands for:
//! - Showing and validating the notifier configuration
//! - Sending a test notice to the configured collector
//! - Recording a deploy

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use faultline_core::config::{Config, LoggingConfig};

mod commands;
mod output;

use commands::{config::ConfigCommand, deploy::DeployCommand, test::TestCommand};
use output::Output;

#[derive(Debug, Parser)]
#[command(name = "faultline", version, about = "Error notice delivery toolkit")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// View and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Send a test notice to the collector
    Test(TestCommand),
    /// Record a deploy with the collector
    Deploy(DeployCommand),
}

impl Cli {
    fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }

    /// Logging settings from the config file, raised by `-v` flags.
    fn logging(&self, config: &LoggingConfig) -> LoggingConfig {
        let level = match self.verbose {
            0 => config.level.clone(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        };
        LoggingConfig {
            level,
            json: config.json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config_path();

    let logging = cli.logging(&Config::load_or_default(&config_path).logging);
    faultline_core::logging::init(&logging)?;

    let output = Output::new(cli.json);
    match &cli.command {
        Commands::Config(cmd) => cmd.execute(&config_path, &output).await,
        Commands::Test(cmd) => cmd.execute(&config_path, &output).await,
        Commands::Deploy(cmd) => cmd.execute(&config_path, &output).await,
    }
}
