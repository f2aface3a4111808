//! Thread-safe deferred result with success and failure callbacks.
//!
//! A [`Promise`] is created per delivery attempt and handed back to the
//! caller immediately. The sender that owns the attempt settles it once the
//! outcome is known; the caller observes the outcome through callbacks,
//! [`Promise::value`] or [`Promise::wait`].
//!
//! Settlement happens once. The first `resolve` or `reject` wins and later
//! calls are ignored.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

type Callback<A> = Box<dyn FnOnce(&A) + Send>;

struct State<T, E> {
    outcome: Option<Result<T, E>>,
    on_success: Vec<Callback<T>>,
    on_failure: Vec<Callback<E>>,
}

struct Inner<T, E> {
    state: Mutex<State<T, E>>,
    settled: watch::Sender<bool>,
}

/// Handle to a single-settlement result. Clones share the same result.
pub struct Promise<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn new() -> Self {
        let (settled, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    outcome: None,
                    on_success: Vec::new(),
                    on_failure: Vec::new(),
                }),
                settled,
            }),
        }
    }

    /// Creates a promise that is already resolved with `value`.
    pub fn resolved(value: T) -> Self {
        let promise = Self::new();
        promise.resolve(value);
        promise
    }

    /// Creates a promise that is already rejected with `error`.
    pub fn rejected(error: E) -> Self {
        let promise = Self::new();
        promise.reject(error);
        promise
    }

    /// Registers a callback for the success value.
    ///
    /// Fires immediately if the promise is already resolved; never fires if
    /// it was rejected.
    pub fn on_success<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let mut state = self.inner.state.lock().unwrap();
        match &state.outcome {
            Some(Ok(value)) => {
                let value = value.clone();
                drop(state);
                callback(&value);
            }
            Some(Err(_)) => {}
            None => state.on_success.push(Box::new(callback)),
        }
        self
    }

    /// Registers a callback for the failure value.
    pub fn on_failure<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&E) + Send + 'static,
    {
        let mut state = self.inner.state.lock().unwrap();
        match &state.outcome {
            Some(Err(error)) => {
                let error = error.clone();
                drop(state);
                callback(&error);
            }
            Some(Ok(_)) => {}
            None => state.on_failure.push(Box::new(callback)),
        }
        self
    }

    /// Resolves the promise. Returns `false` if it was already settled.
    pub fn resolve(&self, value: T) -> bool {
        let callbacks = {
            let mut state = self.inner.state.lock().unwrap();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(Ok(value.clone()));
            state.on_failure.clear();
            std::mem::take(&mut state.on_success)
        };

        self.inner.settled.send_replace(true);
        for callback in callbacks {
            callback(&value);
        }
        true
    }

    /// Rejects the promise. Returns `false` if it was already settled.
    pub fn reject(&self, error: E) -> bool {
        let callbacks = {
            let mut state = self.inner.state.lock().unwrap();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(Err(error.clone()));
            state.on_success.clear();
            std::mem::take(&mut state.on_failure)
        };

        self.inner.settled.send_replace(true);
        for callback in callbacks {
            callback(&error);
        }
        true
    }

    /// Snapshot of the outcome, `None` while pending.
    pub fn value(&self) -> Option<Result<T, E>> {
        self.inner.state.lock().unwrap().outcome.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.inner.state.lock().unwrap().outcome.is_none()
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.inner.state.lock().unwrap().outcome, Some(Ok(_)))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.inner.state.lock().unwrap().outcome, Some(Err(_)))
    }

    /// Waits until the promise is settled and returns the outcome.
    pub async fn wait(&self) -> Result<T, E> {
        let mut settled = self.inner.settled.subscribe();
        loop {
            if let Some(outcome) = self.value() {
                return outcome;
            }
            // The sender lives in `inner`, which `self` keeps alive.
            let _ = settled.changed().await;
        }
    }
}

impl<T, E> Default for Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock().unwrap();
        match &state.outcome {
            None => f.write_str("Promise(<pending>)"),
            Some(Ok(value)) => write!(f, "Promise(Ok({value:?}))"),
            Some(Err(error)) => write!(f, "Promise(Err({error:?}))"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
