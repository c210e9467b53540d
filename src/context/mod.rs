//! Request context subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request
//!     → plugins.rs (request_id, correlation_id, caller plugins)
//!     → RequestContext (per-request key/value store)
//!     → task-local scope around the rest of the chain
//!     → request extensions (explicit handler argument)
//!
//! Any log event emitted while the scope is active
//!     → observability::format reads RequestContext::with_current
//! ```
//!
//! # Design Decisions
//! - One store per request, never shared across requests
//! - Task-locals are not inherited by `tokio::spawn`; use
//!   [`RequestContext::scope`] to carry the context into spawned work
//! - Keys used by record metadata are reserved

pub mod plugins;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};

pub use plugins::{ContextPlugin, HeaderPlugin, IdPlugin, PluginError};

/// Context key holding the request identifier.
pub const REQUEST_ID_KEY: &str = "request_id";

/// Context key holding the correlation identifier.
pub const CORRELATION_ID_KEY: &str = "correlation_id";

/// Keys owned by log record metadata; the context may not shadow them.
pub const RESERVED_KEYS: [&str; 4] = ["logger", "level", "timestamp", "event"];

tokio::task_local! {
    static ACTIVE_CONTEXT: RequestContext;
}

/// Error raised when writing into a request context.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("context key `{0}` is reserved for log record metadata")]
    ReservedKey(String),
}

/// Mutable, request-scoped key/value store.
///
/// Cloning yields another handle to the same store.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    data: Arc<Mutex<Map<String, Value>>>,
}

impl RequestContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when `key` is reserved for record metadata.
    pub fn is_reserved(key: &str) -> bool {
        RESERVED_KEYS.contains(&key)
    }

    /// Insert a value, returning the previous one for that key.
    pub fn insert(
        &self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>, ContextError> {
        let key = key.into();
        if Self::is_reserved(&key) {
            return Err(ContextError::ReservedKey(key));
        }
        Ok(self.lock().insert(key, value.into()))
    }

    /// Insert under a key known not to be reserved.
    pub(crate) fn set(&self, key: &'static str, value: impl Into<Value>) {
        debug_assert!(!Self::is_reserved(key));
        self.lock().insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Request identifier, when the request id plugin ran.
    pub fn request_id(&self) -> Option<String> {
        self.get(REQUEST_ID_KEY)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Correlation identifier, when the correlation id plugin ran.
    pub fn correlation_id(&self) -> Option<String> {
        self.get(CORRELATION_ID_KEY)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Copy of every field currently stored.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Handle to the context of the request being served on this task, if any.
    pub fn current() -> Option<Self> {
        ACTIVE_CONTEXT.try_with(Clone::clone).ok()
    }

    /// Run `f` against the fields of the active context.
    ///
    /// Returns `None` when no context is in scope.
    pub fn with_current<R>(f: impl FnOnce(&Map<String, Value>) -> R) -> Option<R> {
        ACTIVE_CONTEXT.try_with(|ctx| f(&ctx.lock())).ok()
    }

    /// Execute `fut` with this context in scope.
    pub async fn scope<Fut>(self, fut: Fut) -> Fut::Output
    where
        Fut: Future,
    {
        ACTIVE_CONTEXT.scope(self, fut).await
    }

    fn lock(&self) -> MutexGuard<'_, Map<String, Value>> {
        // A panicking writer cannot leave the map half-updated.
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
