//! Deep, cycle-safe, size-bounded copying of payload values.

use std::borrow::Cow;
use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::value::{Map, Value};

/// Substituted for a container that is revisited while it is still being copied.
pub const CIRCULAR: &str = "[Circular]";

/// Appended to strings cut down to the truncation budget.
pub const TRUNCATED: &str = "[Truncated]";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TruncateError {
    #[error("cannot truncate {0} value: expected a list, map or set")]
    UnsupportedValue(&'static str),
}

/// Per-call record of visited containers, keyed by identity.
///
/// `None` marks a container whose copy is in progress; `Some` holds the
/// finished copy so that repeated (non-cyclic) references share it.
type Seen = HashMap<usize, Option<Value>>;

/// Copies values while bounding every container to `max_size` entries and
/// every string to `max_size` characters.
#[derive(Debug, Clone)]
pub struct Truncator {
    max_size: usize,
}

impl Truncator {
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Halves the budget and returns the new value.
    pub fn reduce_max_size(&mut self) -> usize {
        self.max_size /= 2;
        self.max_size
    }

    /// Truncates any value. Never fails.
    pub fn truncate(&self, value: &Value) -> Value {
        let mut seen = Seen::new();
        self.truncate_value(value, &mut seen)
    }

    /// Truncates a top-level container.
    ///
    /// Scalars and objects are rejected: callers handing them over have
    /// mixed up a payload section with one of its values.
    pub fn truncate_object(&self, value: &Value) -> Result<Value, TruncateError> {
        if value.is_container() {
            Ok(self.truncate(value))
        } else {
            Err(TruncateError::UnsupportedValue(value.kind()))
        }
    }

    fn truncate_value(&self, value: &Value, seen: &mut Seen) -> Value {
        match value {
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Symbol(_) => {
                value.clone()
            }
            Value::String(s) => Value::String(self.truncate_string(s)),
            Value::Bytes(bytes) => Value::String(self.truncate_string(&repair_text(bytes))),
            Value::List(list) => self.truncate_container(list.id(), seen, |t, seen| {
                let items: Vec<Value> = list.lock().iter().take(t.max_size).cloned().collect();
                Value::list(t.truncate_items(&items, seen))
            }),
            Value::Set(set) => self.truncate_container(set.id(), seen, |t, seen| {
                let items: Vec<Value> = set.lock().iter().take(t.max_size).cloned().collect();
                Value::set(t.truncate_items(&items, seen))
            }),
            Value::Map(map) => self.truncate_container(map.id(), seen, |t, seen| {
                let entries: Vec<(String, Value)> = map
                    .lock()
                    .iter()
                    .take(t.max_size)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let truncated: Map = entries
                    .into_iter()
                    .map(|(k, v)| {
                        let v = t.truncate_value(&v, seen);
                        (k, v)
                    })
                    .collect();
                Value::map(truncated)
            }),
            Value::Object(object) => {
                let text = match object.to_json() {
                    Some(serde_json::Value::String(s)) => s,
                    Some(json) => json.to_string(),
                    None => format!("{object:?}"),
                };
                Value::String(self.truncate_string(&text))
            }
        }
    }

    fn truncate_items(&self, items: &[Value], seen: &mut Seen) -> Vec<Value> {
        items
            .iter()
            .map(|item| self.truncate_value(item, seen))
            .collect()
    }

    fn truncate_container<F>(&self, id: usize, seen: &mut Seen, copy: F) -> Value
    where
        F: FnOnce(&Self, &mut Seen) -> Value,
    {
        match seen.get(&id) {
            Some(Some(done)) => return done.clone(),
            Some(None) => return Value::from(CIRCULAR),
            None => {}
        }

        seen.insert(id, None);
        let copied = copy(self, seen);
        seen.insert(id, Some(copied.clone()));
        copied
    }

    fn truncate_string(&self, s: &str) -> String {
        if s.chars().count() <= self.max_size {
            return s.to_owned();
        }
        let mut cut: String = s.chars().take(self.max_size).collect();
        cut.push_str(TRUNCATED);
        cut
    }
}

/// Decodes text of unknown encoding as UTF-8.
///
/// Valid input is borrowed as is. Invalid sequences are replaced with
/// U+FFFD so that the result is always representable.
pub fn repair_text(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(e) => {
            debug!(valid_up_to = e.valid_up_to(), len = bytes.len(), "Repairing invalid UTF-8 text");
            String::from_utf8_lossy(bytes)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
