//! Request-scoped application context attached to the next notice.
//!
//! A [`Context`] is an explicit, cloneable handle. Callers merge values into
//! it while handling a unit of work; [`crate::filters::ContextFilter`] moves
//! the accumulated values into the notice and clears the handle.

use std::sync::{Arc, Mutex};

use crate::value::{Map, Value};

#[derive(Debug, Clone, Default)]
pub struct Context {
    inner: Arc<Mutex<Map>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `values` into the context, overwriting existing keys.
    pub fn merge(&self, values: Map) {
        self.inner.lock().unwrap().extend(values);
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.lock().unwrap().insert(key.into(), value.into());
    }

    /// Snapshot of the current values.
    pub fn to_map(&self) -> Map {
        self.inner.lock().unwrap().clone()
    }

    /// Removes and returns all values in one step.
    pub fn take(&self) -> Map {
        std::mem::take(&mut *self.inner.lock().unwrap())
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}
