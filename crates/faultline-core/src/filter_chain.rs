//! Ordered, short-circuiting pipeline of notice filters.

use std::any::Any;
use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

use crate::notice::Notice;

/// Weight assumed for filters that do not declare one.
pub const DEFAULT_WEIGHT: i32 = 0;

/// Transformer, redactor or ignorer applied to a notice before delivery.
///
/// Filters with a higher weight run first. Filters are shared across
/// threads; any internal state needs its own synchronization.
pub trait Filter: Send + Sync + 'static {
    fn weight(&self) -> Option<i32> {
        None
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn call(&self, notice: &mut Notice) -> anyhow::Result<()>;
}

impl<F> Filter for F
where
    F: Fn(&mut Notice) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "closure"
    }

    fn call(&self, notice: &mut Notice) -> anyhow::Result<()> {
        self(notice)
    }
}

/// Closure filter with an explicit weight.
pub struct Weighted<F> {
    weight: i32,
    filter: F,
}

/// Wraps `filter` so that it runs with the given `weight`.
pub fn weighted<F>(weight: i32, filter: F) -> Weighted<F>
where
    F: Fn(&mut Notice) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Weighted { weight, filter }
}

impl<F> Filter for Weighted<F>
where
    F: Fn(&mut Notice) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn weight(&self) -> Option<i32> {
        Some(self.weight)
    }

    fn name(&self) -> &str {
        "weighted closure"
    }

    fn call(&self, notice: &mut Notice) -> anyhow::Result<()> {
        (self.filter)(notice)
    }
}

/// A filter failed while refining a notice.
#[derive(Debug, Error)]
#[error("filter '{filter}' failed: {source:#}")]
pub struct FilterError {
    pub filter: String,
    #[source]
    pub source: anyhow::Error,
}

#[derive(Clone)]
struct Entry {
    filter: Arc<dyn Filter>,
    /// Concrete type, used by `delete_filter` and `includes`.
    as_any: Arc<dyn Any + Send + Sync>,
}

/// Filters sorted by weight, highest first. Equal weights keep their
/// registration order.
#[derive(Clone, Default)]
pub struct FilterChain {
    entries: Vec<Entry>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_filter<T: Filter>(&mut self, filter: T) {
        let filter = Arc::new(filter);
        self.entries.push(Entry {
            filter: filter.clone(),
            as_any: filter,
        });
        // Stable: ties keep insertion order.
        self.entries
            .sort_by_key(|e| std::cmp::Reverse(e.filter.weight().unwrap_or(DEFAULT_WEIGHT)));
    }

    /// Removes every filter of type `T`. Returns whether any was removed.
    pub fn delete_filter<T: Filter>(&mut self) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !e.as_any.is::<T>());
        self.entries.len() != before
    }

    pub fn includes<T: Filter>(&self) -> bool {
        self.entries.iter().any(|e| e.as_any.is::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Filter names in execution order.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.filter.name().to_string())
            .collect()
    }

    /// Runs the filters in order until one ignores the notice or fails.
    pub fn refine(&self, notice: &mut Notice) -> Result<(), FilterError> {
        for entry in &self.entries {
            if notice.is_ignored() {
                break;
            }
            trace!(filter = entry.filter.name(), "Applying filter");
            entry.filter.call(notice).map_err(|source| FilterError {
                filter: entry.filter.name().to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.names())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
