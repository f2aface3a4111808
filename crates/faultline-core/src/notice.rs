//! The notice payload and its size-bounded serialization.
//!
//! A notice has one private section (`notifier`) and five modifiable ones:
//! `errors`, `context`, `environment`, `session` and `params`. Filters read
//! and replace the modifiable sections through [`Notice::get`] and
//! [`Notice::set`]; `errors` can be read and mutated in place but not
//! replaced. Once a notice is ignored, every access fails.
//!
//! [`Notice::serialize`] shrinks the payload with a [`Truncator`] until the
//! JSON document fits under the configured byte ceiling, halving the
//! truncation budget after every pass.

use std::sync::OnceLock;

use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, error};

use crate::config::Config;
use crate::error_info::ErrorInfo;
use crate::host_info::HostInfo;
use crate::truncator::Truncator;
use crate::value::{EncodeError, Map, Shared, Value};

pub const NOTIFIER_NAME: &str = "faultline";
pub const NOTIFIER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Severity reported for every notice.
pub const DEFAULT_SEVERITY: &str = "error";

/// Keys accepted by [`Notice::get`].
pub const READABLE_KEYS: &[&str] = &["errors", "context", "environment", "session", "params"];

/// Keys accepted by [`Notice::set`].
pub const WRITABLE_KEYS: &[&str] = &["context", "environment", "session", "params"];

/// Longest payload excerpt written to the log when a notice is dropped.
const LOG_EXCERPT_CHARS: usize = 2_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NoticeError {
    #[error("cannot access an ignored notice")]
    Ignored,

    #[error("unknown notice key '{0}'")]
    UnknownKey(String),

    #[error("notice key '{0}' cannot be replaced")]
    ReadOnlyKey(String),

    #[error("notice key '{key}' expects a map, got {kind}")]
    NotAMap { key: String, kind: &'static str },

    #[error("notice could not be truncated below {limit} bytes")]
    TruncationExhausted { limit: usize },
}

/// One error event on its way to the collector.
#[derive(Debug)]
pub struct Notice {
    notifier: JsonValue,
    errors: Value,
    context: Value,
    environment: Value,
    session: Value,
    params: Value,
    ignored: bool,
    max_notice_bytes: usize,
    truncation_budget: usize,
}

fn host_info() -> &'static HostInfo {
    static HOST: OnceLock<HostInfo> = OnceLock::new();
    HOST.get_or_init(HostInfo::collect)
}

impl Notice {
    /// Builds a notice for `errors` with caller-supplied `params`.
    pub fn build(config: &Config, errors: Vec<ErrorInfo>, params: Map) -> Self {
        let notifier = json!({ "name": NOTIFIER_NAME, "version": NOTIFIER_VERSION });
        let host = host_info();

        let mut context = Map::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                context.insert(key.to_string(), Value::String(value));
            }
        };
        put("version", config.project.app_version.clone());
        put(
            "rootDirectory",
            config
                .project
                .root_directory
                .as_ref()
                .map(|p| p.display().to_string()),
        );
        put("environment", config.project.environment.clone());
        put("hostname", Some(host.hostname.clone()));
        put("severity", Some(DEFAULT_SEVERITY.to_string()));
        put("os", Some(host.os.clone()));
        put("language", Some(host.language.clone()));
        context.insert("notifier".to_string(), Value::from(notifier.clone()));

        let mut environment = Map::new();
        if let Some(program) = std::env::args().next() {
            environment.insert("program_name".to_string(), Value::String(program));
        }

        Self {
            notifier,
            errors: Value::list(errors.iter().map(ErrorInfo::to_value).collect()),
            context: Value::map(context),
            environment: Value::map(environment),
            session: Value::empty_map(),
            params: Value::map(params),
            ignored: false,
            max_notice_bytes: config.notice.max_notice_bytes,
            truncation_budget: config.notice.initial_truncation_budget,
        }
    }

    pub fn ignore(&mut self) {
        self.ignored = true;
    }

    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    /// Returns a handle to a section. Containers are shared, so changes made
    /// through the handle are visible in the notice.
    pub fn get(&self, key: &str) -> Result<Value, NoticeError> {
        self.ensure_active()?;
        match key {
            "errors" => Ok(self.errors.clone()),
            "context" => Ok(self.context.clone()),
            "environment" => Ok(self.environment.clone()),
            "session" => Ok(self.session.clone()),
            "params" => Ok(self.params.clone()),
            other => Err(NoticeError::UnknownKey(other.to_string())),
        }
    }

    /// Replaces a writable section with a map.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), NoticeError> {
        self.ensure_active()?;
        let slot = match key {
            "context" => &mut self.context,
            "environment" => &mut self.environment,
            "session" => &mut self.session,
            "params" => &mut self.params,
            "errors" | "notifier" => return Err(NoticeError::ReadOnlyKey(key.to_string())),
            other => return Err(NoticeError::UnknownKey(other.to_string())),
        };
        if !matches!(value, Value::Map(_)) {
            return Err(NoticeError::NotAMap {
                key: key.to_string(),
                kind: value.kind(),
            });
        }
        *slot = value;
        Ok(())
    }

    /// Map handle of a map section, for in-place edits.
    pub fn section(&self, key: &str) -> Result<Shared<Map>, NoticeError> {
        match self.get(key)? {
            Value::Map(map) => Ok(map),
            other => Err(NoticeError::NotAMap {
                key: key.to_string(),
                kind: other.kind(),
            }),
        }
    }

    /// Merges `params` into the params section, overwriting existing keys.
    pub fn merge_params(&mut self, params: Map) -> Result<(), NoticeError> {
        if params.is_empty() {
            return self.ensure_active();
        }
        self.section("params")?.lock().extend(params);
        Ok(())
    }

    /// Handle to the error list.
    pub fn errors(&self) -> Result<Shared<Vec<Value>>, NoticeError> {
        self.ensure_active()?;
        Ok(self
            .errors
            .as_list()
            .cloned()
            .unwrap_or_else(|| Shared::new(Vec::new())))
    }

    /// Types of all errors, outermost first.
    pub fn error_types(&self) -> Result<Vec<String>, NoticeError> {
        let errors = self.errors()?;
        let items = errors.lock().clone();
        Ok(items
            .iter()
            .filter_map(|e| {
                let map = e.as_map()?;
                let ty = map.lock().get("type")?.as_str()?.to_string();
                Some(ty)
            })
            .collect())
    }

    /// Serializes the notice to JSON, shrinking it until it fits.
    ///
    /// Returns [`NoticeError::TruncationExhausted`] when even a budget of one
    /// element per container does not bring it under the size limit. Such a
    /// notice will never fit and must not be retried.
    pub fn serialize(&mut self) -> Result<String, NoticeError> {
        self.ensure_active()?;

        let limit = self.max_notice_bytes;
        let mut truncator = Truncator::new(self.truncation_budget);
        let mut last_attempt = String::new();
        loop {
            match self.encode() {
                Ok(json) if json.len() <= limit => return Ok(json),
                Ok(json) => {
                    debug!(
                        bytes = json.len(),
                        limit,
                        budget = truncator.max_size(),
                        "Notice exceeds size limit, truncating"
                    );
                    last_attempt = json;
                }
                Err(e) => {
                    debug!(error = %e, budget = truncator.max_size(), "Notice encoding failed, truncating");
                }
            }

            if truncator.max_size() == 0 {
                let excerpt: String = last_attempt.chars().take(LOG_EXCERPT_CHARS).collect();
                error!(
                    limit,
                    bytes = last_attempt.len(),
                    error_types = ?self.error_types().unwrap_or_default(),
                    payload = %excerpt,
                    "Notice truncation failed, dropping notice"
                );
                return Err(NoticeError::TruncationExhausted { limit });
            }

            self.truncate(&truncator);
            truncator.reduce_max_size();
        }
    }

    fn encode(&self) -> Result<String, EncodeError> {
        let mut doc = serde_json::Map::new();
        doc.insert("errors".into(), self.errors.to_json()?);
        doc.insert("context".into(), self.context.to_json()?);
        doc.insert("environment".into(), self.environment.to_json()?);
        doc.insert("session".into(), self.session.to_json()?);
        doc.insert("params".into(), self.params.to_json()?);
        doc.insert("notifier".into(), self.notifier.clone());
        Ok(JsonValue::Object(doc).to_string())
    }

    fn truncate(&mut self, truncator: &Truncator) {
        for slot in [
            &mut self.errors,
            &mut self.environment,
            &mut self.session,
            &mut self.params,
        ] {
            *slot = truncator.truncate(slot);
        }
    }

    fn ensure_active(&self) -> Result<(), NoticeError> {
        if self.ignored {
            Err(NoticeError::Ignored)
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
