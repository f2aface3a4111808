//! Dynamic structured values carried by notice sections.
//!
//! Notice payloads are built from arbitrary application data: request
//! parameters, session contents, user-provided context. [`Value`] models that
//! data. Containers are shared handles ([`Shared`]) with pointer identity, so
//! the same list or map may appear several times in one payload, including
//! inside itself. Encoding to JSON detects such cycles and reports them as a
//! recoverable [`EncodeError`] instead of recursing forever.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Ordered key-value container used for map values.
pub type Map = IndexMap<String, Value>;

// ============================================================================
// Shared
// ============================================================================

/// Shared, mutable, identity-bearing handle to a container.
///
/// Cloning a `Shared` clones the handle, not the contents.
pub struct Shared<T>(Arc<Mutex<T>>);

impl<T> Shared<T> {
    pub fn new(inner: T) -> Self {
        Self(Arc::new(Mutex::new(inner)))
    }

    /// Locks the container for reading or writing.
    ///
    /// A poisoned lock is recovered: container contents stay structurally
    /// valid even if a writer panicked mid-update.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Identity of the underlying allocation.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

// Only the address is printed: contents may reference the handle itself.
impl<T> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shared({:#x})", self.id())
    }
}

// ============================================================================
// Inspect
// ============================================================================

/// Application objects that can be embedded in a payload.
///
/// Objects are never serialized structurally by the truncator. They are
/// stringified: the JSON form when [`Inspect::to_json`] provides one,
/// otherwise their `Debug` description.
pub trait Inspect: fmt::Debug + Send + Sync {
    fn to_json(&self) -> Option<JsonValue> {
        None
    }
}

// ============================================================================
// Value
// ============================================================================

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Interned identifier-like scalar, passed through untouched.
    Symbol(String),
    String(String),
    /// Raw text of unknown encoding. May be invalid UTF-8.
    Bytes(Vec<u8>),
    List(Shared<Vec<Value>>),
    Map(Shared<Map>),
    Set(Shared<Vec<Value>>),
    Object(Arc<dyn Inspect>),
}

/// Recoverable failures when encoding a [`Value`] as JSON.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("circular reference detected")]
    Circular,

    #[error("invalid UTF-8 text")]
    InvalidText,

    #[error("non-finite float {0} cannot be encoded")]
    NonFiniteFloat(f64),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Shared::new(items))
    }

    pub fn map(entries: Map) -> Self {
        Value::Map(Shared::new(entries))
    }

    pub fn empty_map() -> Self {
        Value::map(Map::new())
    }

    pub fn set(items: Vec<Value>) -> Self {
        Value::Set(Shared::new(items))
    }

    pub fn symbol(name: impl Into<String>) -> Self {
        Value::Symbol(name.into())
    }

    pub fn object(object: impl Inspect + 'static) -> Self {
        Value::Object(Arc::new(object))
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Symbol(_) => "symbol",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_) | Value::Set(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Shared<Map>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Shared<Vec<Value>>> {
        match self {
            Value::List(list) | Value::Set(list) => Some(list),
            _ => None,
        }
    }

    /// Encodes the value as JSON.
    ///
    /// Fails on circular references, invalid text and non-finite floats.
    /// Shared containers that are merely repeated (not cyclic) encode fine.
    pub fn to_json(&self) -> Result<JsonValue, EncodeError> {
        let mut active = HashSet::new();
        self.encode(&mut active)
    }

    fn encode(&self, active: &mut HashSet<usize>) -> Result<JsonValue, EncodeError> {
        match self {
            Value::Null => Ok(JsonValue::Null),
            Value::Bool(b) => Ok(JsonValue::Bool(*b)),
            Value::Int(i) => Ok(JsonValue::from(*i)),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .ok_or(EncodeError::NonFiniteFloat(*f)),
            Value::Symbol(s) | Value::String(s) => Ok(JsonValue::String(s.clone())),
            Value::Bytes(bytes) => std::str::from_utf8(bytes)
                .map(|s| JsonValue::String(s.to_owned()))
                .map_err(|_| EncodeError::InvalidText),
            Value::List(list) | Value::Set(list) => {
                let id = list.id();
                if !active.insert(id) {
                    return Err(EncodeError::Circular);
                }
                // Snapshot so no lock is held while descending.
                let items = list.lock().clone();
                let encoded = items
                    .iter()
                    .map(|item| item.encode(active))
                    .collect::<Result<Vec<_>, _>>();
                active.remove(&id);
                Ok(JsonValue::Array(encoded?))
            }
            Value::Map(map) => {
                let id = map.id();
                if !active.insert(id) {
                    return Err(EncodeError::Circular);
                }
                let entries = map.lock().clone();
                let encoded = entries
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), value.encode(active)?)))
                    .collect::<Result<serde_json::Map<String, JsonValue>, EncodeError>>();
                active.remove(&id);
                Ok(JsonValue::Object(encoded?))
            }
            Value::Object(object) => Ok(object
                .to_json()
                .unwrap_or_else(|| JsonValue::String(format!("{object:?}")))),
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

impl From<Map> for Value {
    fn from(entries: Map) -> Self {
        Value::map(entries)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::list(items.into_iter().map(Value::from).collect()),
            JsonValue::Object(entries) => Value::map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
