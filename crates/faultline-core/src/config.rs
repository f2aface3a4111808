//! Configuration module for faultline.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for a notifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub delivery: DeliveryConfig,
    pub notice: NoticeConfig,
    pub logging: LoggingConfig,
}

/// Collector project and application identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project identifier on the collector. Required.
    pub project_id: Option<u64>,
    /// Project API key. Required.
    pub project_key: Option<String>,
    /// Collector base URL. `https://` is assumed when no scheme is given.
    pub host: String,
    /// Environment the application runs in, e.g. `production`.
    pub environment: Option<String>,
    /// Environments for which notices are never sent.
    pub ignore_environments: Vec<String>,
    /// Version of the instrumented application.
    pub app_version: Option<String>,
    /// Project root, replaced with `/PROJECT_ROOT` in backtraces.
    pub root_directory: Option<PathBuf>,
}

/// Worker pool and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Capacity of the async delivery queue.
    pub queue_size: usize,
    /// Number of background workers. `0` delivers every notice inline.
    pub workers: usize,
    /// HTTP timeout in seconds. `None` uses the client default.
    pub timeout_secs: Option<u64>,
    /// Whether failed deliveries are retried through the backlog.
    pub backlog: bool,
    /// Milliseconds between backlog flushes.
    pub backlog_flush_period_ms: u64,
}

/// Payload size limits and notice-level filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoticeConfig {
    /// Hard ceiling for a serialized notice, in bytes.
    pub max_notice_bytes: usize,
    /// Truncation budget of the first shrinking pass.
    pub initial_truncation_budget: usize,
    /// Error types that are never reported.
    pub ignore_error_types: Vec<String>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/faultline/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("faultline")
            .join("config.yaml")
    }

    /// Full URL of the notice API: `<host>/api/v3/projects/<id>/notices`.
    pub fn endpoint(&self) -> anyhow::Result<Url> {
        self.project_url("api/v3", "notices")
    }

    /// Full URL of the deploy API: `<host>/api/v4/projects/<id>/deploys`.
    pub fn deploy_endpoint(&self) -> anyhow::Result<Url> {
        self.project_url("api/v4", "deploys")
    }

    fn project_url(&self, api: &str, resource: &str) -> anyhow::Result<Url> {
        let project_id = self
            .project
            .project_id
            .context("project.project_id is not set")?;

        let mut host = self.project.host.clone();
        if !host.starts_with("http://") && !host.starts_with("https://") {
            host.insert_str(0, "https://");
        }
        if !host.ends_with('/') {
            host.push('/');
        }

        let base = Url::parse(&host).with_context(|| format!("invalid host '{host}'"))?;
        let url = base.join(&format!("{api}/projects/{project_id}/{resource}"))?;
        Ok(url)
    }

    /// Whether the configured environment is listed in `ignore_environments`.
    pub fn is_ignored_environment(&self) -> bool {
        let ignored = &self.project.ignore_environments;
        let Some(environment) = self.project.environment.as_deref() else {
            if !ignored.is_empty() {
                warn!("project.environment is not set, project.ignore_environments has no effect");
            }
            return false;
        };
        ignored.iter().any(|env| env == environment)
    }

    pub fn flush_period(&self) -> Duration {
        Duration::from_millis(self.delivery.backlog_flush_period_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.delivery.timeout_secs.map(Duration::from_secs)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            project_key: None,
            host: "https://airbrake.io".to_string(),
            environment: None,
            ignore_environments: Vec::new(),
            app_version: None,
            root_directory: std::env::current_dir().ok(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            queue_size: 100,
            workers: 1,
            timeout_secs: None,
            backlog: true,
            backlog_flush_period_ms: 120_000,
        }
    }
}

impl Default for NoticeConfig {
    fn default() -> Self {
        Self {
            max_notice_bytes: 64_000,
            initial_truncation_budget: 10_000,
            ignore_error_types: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"delivery.queue_size"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid. Project credentials
    /// are not required when the current environment is ignored.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- project ---
        if !self.is_ignored_environment() {
            if self.project.project_id.unwrap_or(0) == 0 {
                errors.push(ValidationError {
                    field: "project.project_id".into(),
                    message: "is required".into(),
                });
            }
            if self.project.project_key.as_deref().unwrap_or("").is_empty() {
                errors.push(ValidationError {
                    field: "project.project_key".into(),
                    message: "is required".into(),
                });
            }
        }
        if self.project.host.trim().is_empty() {
            errors.push(ValidationError {
                field: "project.host".into(),
                message: "must not be empty".into(),
            });
        } else if self.project.project_id.is_some() {
            if let Err(e) = self.endpoint() {
                errors.push(ValidationError {
                    field: "project.host".into(),
                    message: format!("{e:#}"),
                });
            }
        }

        // --- delivery ---
        if self.delivery.queue_size == 0 {
            errors.push(ValidationError {
                field: "delivery.queue_size".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.delivery.backlog_flush_period_ms == 0 {
            errors.push(ValidationError {
                field: "delivery.backlog_flush_period_ms".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.delivery.timeout_secs == Some(0) {
            errors.push(ValidationError {
                field: "delivery.timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- notice ---
        if self.notice.max_notice_bytes == 0 {
            errors.push(ValidationError {
                field: "notice.max_notice_bytes".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.notice.initial_truncation_budget == 0 {
            errors.push(ValidationError {
                field: "notice.initial_truncation_budget".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use faultline_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .project_id(42)
///     .project_key("secret")
///     .environment("production")
///     .workers(2)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- project ---

    pub fn project_id(mut self, id: u64) -> Self {
        self.config.project.project_id = Some(id);
        self
    }

    pub fn project_key(mut self, key: impl Into<String>) -> Self {
        self.config.project.project_key = Some(key.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.project.host = host.into();
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.config.project.environment = Some(environment.into());
        self
    }

    pub fn ignore_environment(mut self, environment: impl Into<String>) -> Self {
        self.config
            .project
            .ignore_environments
            .push(environment.into());
        self
    }

    pub fn app_version(mut self, version: impl Into<String>) -> Self {
        self.config.project.app_version = Some(version.into());
        self
    }

    pub fn root_directory(mut self, root: PathBuf) -> Self {
        self.config.project.root_directory = Some(root);
        self
    }

    // --- delivery ---

    pub fn queue_size(mut self, size: usize) -> Self {
        self.config.delivery.queue_size = size;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.delivery.workers = workers;
        self
    }

    pub fn timeout_secs(mut self, seconds: u64) -> Self {
        self.config.delivery.timeout_secs = Some(seconds);
        self
    }

    pub fn backlog(mut self, enabled: bool) -> Self {
        self.config.delivery.backlog = enabled;
        self
    }

    pub fn backlog_flush_period(mut self, period: Duration) -> Self {
        self.config.delivery.backlog_flush_period_ms = period.as_millis() as u64;
        self
    }

    // --- notice ---

    pub fn max_notice_bytes(mut self, bytes: usize) -> Self {
        self.config.notice.max_notice_bytes = bytes;
        self
    }

    pub fn initial_truncation_budget(mut self, budget: usize) -> Self {
        self.config.notice.initial_truncation_budget = budget;
        self
    }

    pub fn ignore_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.config.notice.ignore_error_types.push(error_type.into());
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
