//! Built-in healing strategies
//!
//! Each strategy wraps a caller-supplied async action that does the actual
//! remediation (reconnect a pool, drop caches, recycle a socket). The
//! strategy owns eligibility matching and any internal retry policy; the
//! engine only sees success or failure.

use crate::context::ErrorContext;
use crate::errors::{ErrorCategory, SystemError};
use crate::healing::HealingStrategy;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Caller-supplied remediation action.
pub type HealAction = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure into a [`HealAction`].
pub fn heal_action<F, Fut>(f: F) -> HealAction
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Re-establish a lost database connection.
pub struct DatabaseReconnection {
    action: HealAction,
}

impl DatabaseReconnection {
    pub const PRIORITY: i32 = 10;

    pub fn new(action: HealAction) -> Self {
        Self { action }
    }
}

#[async_trait::async_trait]
impl HealingStrategy for DatabaseReconnection {
    fn name(&self) -> &str {
        "database_reconnection"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn can_handle(&self, error: &SystemError, _ctx: &ErrorContext) -> bool {
        ErrorCategory::classify(error) == ErrorCategory::DatabaseConnection
    }

    async fn heal(&self, _error: &SystemError, ctx: &ErrorContext) -> anyhow::Result<()> {
        debug!(component = %ctx.component, "Reconnecting database");
        (self.action)().await
    }
}

/// Retry a failed API call with exponential delay, local to the strategy.
pub struct ApiRetry {
    action: HealAction,
    max_attempts: u32,
    base_delay: Duration,
}

impl ApiRetry {
    pub const PRIORITY: i32 = 8;

    pub fn new(action: HealAction) -> Self {
        Self {
            action,
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }

    pub fn with_policy(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.base_delay = base_delay;
        self
    }
}

#[async_trait::async_trait]
impl HealingStrategy for ApiRetry {
    fn name(&self) -> &str {
        "api_retry"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn can_handle(&self, error: &SystemError, _ctx: &ErrorContext) -> bool {
        matches!(
            ErrorCategory::classify(error),
            ErrorCategory::ApiTimeout | ErrorCategory::NetworkError
        )
    }

    async fn heal(&self, _error: &SystemError, ctx: &ErrorContext) -> anyhow::Result<()> {
        let mut last_err = None;
        for attempt in 1..=self.max_attempts {
            match (self.action)().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        component = %ctx.component,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "API heal attempt failed"
                    );
                    last_err = Some(e);
                    if attempt < self.max_attempts {
                        let delay = self.base_delay * 2u32.saturating_pow(attempt - 1);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("api retry exhausted")))
    }
}

/// Recycle a dropped websocket connection.
pub struct WebSocketReconnection {
    action: HealAction,
}

impl WebSocketReconnection {
    pub const PRIORITY: i32 = 7;

    pub fn new(action: HealAction) -> Self {
        Self { action }
    }
}

#[async_trait::async_trait]
impl HealingStrategy for WebSocketReconnection {
    fn name(&self) -> &str {
        "websocket_reconnection"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn can_handle(&self, error: &SystemError, _ctx: &ErrorContext) -> bool {
        ErrorCategory::classify(error) == ErrorCategory::WebsocketDisconnect
    }

    async fn heal(&self, _error: &SystemError, ctx: &ErrorContext) -> anyhow::Result<()> {
        debug!(component = %ctx.component, "Recycling websocket connection");
        (self.action)().await
    }
}

/// Drop caches and buffers when memory pressure is the diagnosed cause.
pub struct MemoryCleanup {
    action: HealAction,
}

impl MemoryCleanup {
    pub const PRIORITY: i32 = 5;

    pub fn new(action: HealAction) -> Self {
        Self { action }
    }
}

#[async_trait::async_trait]
impl HealingStrategy for MemoryCleanup {
    fn name(&self) -> &str {
        "memory_cleanup"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn can_handle(&self, error: &SystemError, _ctx: &ErrorContext) -> bool {
        ErrorCategory::classify(error) == ErrorCategory::MemoryLeak
    }

    async fn heal(&self, _error: &SystemError, ctx: &ErrorContext) -> anyhow::Result<()> {
        debug!(component = %ctx.component, "Clearing caches under memory pressure");
        (self.action)().await
    }
}
