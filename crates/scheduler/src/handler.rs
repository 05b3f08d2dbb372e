//! Task handlers and the handler registry.

use async_trait::async_trait;
use foreman_core::Task;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// An opaque async callable that executes one task.
///
/// Handlers receive a snapshot of the task and return an opaque result
/// value, or an error that drives the bounded-retry loop. Side effects
/// (external tickets, files, API calls) are the handler's own concern;
/// the scheduler only consumes the result.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute the task.
    async fn run(&self, task: Task) -> anyhow::Result<serde_json::Value>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    async fn run(&self, task: Task) -> anyhow::Result<serde_json::Value> {
        (self.0)(task).await
    }
}

/// Wrap an async closure as a [`TaskHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Registry mapping `task_type` keys to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for a task type.
    pub fn register(&mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let task_type = task_type.into();
        info!(task_type = %task_type, "handler registered");
        self.handlers.insert(task_type, handler);
    }

    /// Look up the handler for a task type.
    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    /// Whether a handler exists for a task type.
    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}
