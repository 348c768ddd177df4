//! Caller-supplied context for recovery

use crate::errors::SystemError;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// The protected unit of work.
///
/// Stored behind `Arc` so the orchestrator can re-invoke it during retries.
/// Callers must supply an idempotent or retry-safe operation; the core
/// cannot enforce that contract.
pub type Operation =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Value, SystemError>> + Send + Sync>;

/// Wrap an async closure into an [`Operation`].
pub fn operation<F, Fut>(f: F) -> Operation
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value, SystemError>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Where an error happened and how to redo the caller's real work.
#[derive(Clone, Default)]
pub struct ErrorContext {
    /// Component the operation belongs to
    pub component: String,
    /// Operation name, e.g. `fetch_lesson_plan`
    pub operation: String,
    /// User on whose behalf the operation ran
    pub user: Option<String>,
    /// Session the operation ran in
    pub session: Option<String>,
    /// Free-form metadata
    pub metadata: HashMap<String, Value>,
    /// The caller's real work, retried by the orchestrator when present
    pub original_operation: Option<Operation>,
}

impl ErrorContext {
    pub fn new(component: &str, operation: &str) -> Self {
        Self {
            component: component.to_string(),
            operation: operation.to_string(),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    pub fn with_session(mut self, session: &str) -> Self {
        self.session = Some(session.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn with_operation(mut self, op: Operation) -> Self {
        self.original_operation = Some(op);
        self
    }
}

impl std::fmt::Debug for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorContext")
            .field("component", &self.component)
            .field("operation", &self.operation)
            .field("user", &self.user)
            .field("session", &self.session)
            .field("metadata", &self.metadata)
            .field(
                "original_operation",
                &self.original_operation.as_ref().map(|_| "<fn>"),
            )
            .finish()
    }
}
