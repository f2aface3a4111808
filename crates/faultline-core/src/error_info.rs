//! Conversion of Rust errors into notice error entries.
//!
//! Each entry carries `{type, message, backtrace}`. An error and its
//! `source()` chain are unwound into at most [`MAX_NESTED_ERRORS`] entries.

use std::backtrace::Backtrace;
use std::error::Error;

use serde::{Deserialize, Serialize};

use crate::value::{Map, Value};

/// Maximum number of entries produced from one error chain.
pub const MAX_NESTED_ERRORS: usize = 3;

/// Single backtrace frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub function: String,
}

impl Frame {
    pub fn new(file: impl Into<String>, line: u32, function: impl Into<String>) -> Self {
        Self {
            file: Some(file.into()),
            line: Some(line),
            function: function.into(),
        }
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("file".into(), self.file.clone().into());
        map.insert("line".into(), self.line.into());
        map.insert("function".into(), self.function.clone().into());
        Value::map(map)
    }
}

/// One error of a notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub error_type: String,
    pub message: String,
    pub backtrace: Vec<Frame>,
}

impl ErrorInfo {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self {
            error_type: error_type.into(),
            message: headline(&message).to_owned(),
            backtrace: Vec::new(),
        }
    }

    pub fn with_backtrace(mut self, frames: Vec<Frame>) -> Self {
        self.backtrace = frames;
        self
    }

    /// Attaches the backtrace of the calling thread.
    pub fn capture_backtrace(self) -> Self {
        let rendered = Backtrace::force_capture().to_string();
        self.with_backtrace(parse_backtrace(&rendered))
    }

    /// Unwinds `error` and its sources.
    ///
    /// The outermost entry is named after `E`; sources are named after the
    /// leading identifier of their `Debug` output.
    pub fn of<E>(error: &E) -> Vec<ErrorInfo>
    where
        E: Error + 'static,
    {
        let mut errors = Self::from_error(error);
        if let Some(first) = errors.first_mut() {
            first.error_type = short_type_name(std::any::type_name::<E>());
        }
        errors
    }

    /// Unwinds a type-erased error and its sources.
    pub fn from_error(error: &(dyn Error + 'static)) -> Vec<ErrorInfo> {
        let mut errors = Vec::new();
        let mut current = Some(error);
        while let Some(err) = current {
            if errors.len() >= MAX_NESTED_ERRORS {
                break;
            }
            errors.push(ErrorInfo::new(type_from_debug(err), err.to_string()));
            current = err.source();
        }
        errors
    }

    /// Payload form: `{type, message, backtrace}`.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("type".into(), self.error_type.clone().into());
        map.insert("message".into(), self.message.clone().into());
        map.insert(
            "backtrace".into(),
            Value::list(self.backtrace.iter().map(Frame::to_value).collect()),
        );
        Value::map(map)
    }
}

/// Keeps the part of a message before the first blank line.
fn headline(message: &str) -> &str {
    message.split("\n\n").next().unwrap_or(message)
}

fn short_type_name(full: &str) -> String {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_owned()
}

fn type_from_debug(error: &dyn Error) -> String {
    let debug = format!("{error:?}");
    let ident: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if ident.is_empty() {
        "Error".to_owned()
    } else {
        ident
    }
}

/// Parses the rendered form of [`std::backtrace::Backtrace`].
///
/// ```text
///    0: app::handler
///              at ./src/handler.rs:12:5
/// ```
pub fn parse_backtrace(rendered: &str) -> Vec<Frame> {
    let mut frames: Vec<Frame> = Vec::new();
    for line in rendered.lines().map(str::trim) {
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                let (file, line_no) = split_location(location);
                frame.file = Some(file.to_owned());
                frame.line = line_no;
            }
            continue;
        }

        let Some((index, function)) = line.split_once(": ") else {
            continue;
        };
        if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) {
            frames.push(Frame {
                file: None,
                line: None,
                function: function.to_owned(),
            });
        }
    }
    frames
}

/// Splits `path:line:column` into the path and the line number.
fn split_location(location: &str) -> (&str, Option<u32>) {
    let mut parts = location.rsplitn(3, ':');
    let column = parts.next();
    let line = parts.next();
    match (parts.next(), line, column) {
        (Some(file), Some(line), Some(_)) => (file, line.parse().ok()),
        _ => (location, None),
    }
}

// ============================================================================
// Tests
// ============================================================================
