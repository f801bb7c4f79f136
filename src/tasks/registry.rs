//! Task handler registry.
//!
//! Callers schedule work by a stable string identifier; the registry
//! maps those identifiers to statically-typed handlers populated at
//! startup. Lookup fails closed: an unregistered identifier produces
//! `TaskError::UnknownHandler` instead of any reflective search.
//!
//! Two handler shapes are supported:
//!
//! - **async** handlers run directly on the shared runtime (I/O-bound
//!   work)
//! - **blocking** handlers are bridged through `spawn_blocking`
//!   (CPU-bound or otherwise synchronous work)

use anyhow::Result;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::errors::TaskError;

/// Execution context handed to a task handler.
#[derive(Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    /// Cooperative cancellation signal. Cancellation is advisory: a
    /// handler that never checks this token runs to completion.
    pub cancel: CancellationToken,
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
type AsyncHandler = Arc<dyn Fn(TaskContext) -> HandlerFuture + Send + Sync>;
type BlockingHandler = Arc<dyn Fn(TaskContext) -> Result<Value> + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Async(AsyncHandler),
    Blocking(BlockingHandler),
}

/// Registry mapping handler keys to task handlers.
pub struct TaskRegistry {
    handlers: HashMap<String, Handler>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register an async handler under a key. Chainable.
    pub fn register<F, Fut>(mut self, key: &str, handler: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.handlers.insert(
            key.to_string(),
            Handler::Async(Arc::new(move |ctx| Box::pin(handler(ctx)))),
        );
        self
    }

    /// Register a blocking handler under a key; it will run on the
    /// blocking thread pool. Chainable.
    pub fn register_blocking<F>(mut self, key: &str, handler: F) -> Self
    where
        F: Fn(TaskContext) -> Result<Value> + Send + Sync + 'static,
    {
        self.handlers
            .insert(key.to_string(), Handler::Blocking(Arc::new(handler)));
        self
    }

    /// Whether a handler is registered for a key.
    pub fn supports(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    /// Keys of all registered handlers.
    pub fn registered_keys(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Invoke the handler registered under a key.
    ///
    /// Unknown keys fail closed with [`TaskError::UnknownHandler`]; a
    /// panicking blocking handler surfaces as
    /// [`TaskError::HandlerPanicked`].
    pub async fn invoke(&self, key: &str, ctx: TaskContext) -> Result<Value> {
        let handler = self
            .handlers
            .get(key)
            .ok_or_else(|| TaskError::UnknownHandler {
                handler: key.to_string(),
            })?
            .clone();

        match handler {
            Handler::Async(f) => f(ctx).await,
            Handler::Blocking(f) => {
                let result = tokio::task::spawn_blocking(move || f(ctx)).await;
                match result {
                    Ok(outcome) => outcome,
                    Err(join_error) => Err(TaskError::HandlerPanicked {
                        details: join_error.to_string(),
                    }
                    .into()),
                }
            }
        }
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
