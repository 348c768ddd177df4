//! Built-in degraded-service fallback strategies
//!
//! These serve stale, simplified, or offline content instead of replicating
//! the primary operation.

use crate::context::ErrorContext;
use crate::errors::SystemError;
use crate::fallback::FallbackStrategy;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use std::num::NonZeroUsize;
use tracing::debug;

/// Serve the most recent good response for the same operation.
///
/// Keyed by `component:operation`; callers warm the cache from their own
/// success paths.
pub struct CachedResponse {
    cache: Mutex<LruCache<String, Value>>,
}

impl CachedResponse {
    pub const PRIORITY: i32 = 10;

    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn key(ctx: &ErrorContext) -> String {
        format!("{}:{}", ctx.component, ctx.operation)
    }

    /// Store a known-good response for later degraded service.
    pub fn warm(&self, ctx: &ErrorContext, value: Value) {
        self.cache.lock().put(Self::key(ctx), value);
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl FallbackStrategy for CachedResponse {
    fn name(&self) -> &str {
        "cached_response"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn can_handle(&self, _error: &SystemError, ctx: &ErrorContext) -> bool {
        self.cache.lock().contains(&Self::key(ctx))
    }

    async fn execute(&self, ctx: &ErrorContext) -> anyhow::Result<Value> {
        let key = Self::key(ctx);
        let mut cache = self.cache.lock();
        match cache.get(&key) {
            Some(value) => {
                debug!(key = %key, "Serving cached response");
                Ok(serde_json::json!({
                    "stale": true,
                    "data": value.clone(),
                }))
            }
            None => anyhow::bail!("no cached response for {key}"),
        }
    }
}

/// Serve a static minimal payload when nothing better is available.
pub struct SimplifiedResponse {
    payload: Value,
}

impl SimplifiedResponse {
    pub const PRIORITY: i32 = 5;

    pub fn new(payload: Value) -> Self {
        Self { payload }
    }
}

#[async_trait::async_trait]
impl FallbackStrategy for SimplifiedResponse {
    fn name(&self) -> &str {
        "simplified_response"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn can_handle(&self, _error: &SystemError, _ctx: &ErrorContext) -> bool {
        true
    }

    async fn execute(&self, ctx: &ErrorContext) -> anyhow::Result<Value> {
        debug!(operation = %ctx.operation, "Serving simplified response");
        Ok(serde_json::json!({
            "degraded": true,
            "data": self.payload.clone(),
        }))
    }
}

/// Serve canned offline content, e.g. bundled lesson material when the
/// backend is unreachable.
pub struct OfflineContent {
    content: Value,
}

impl OfflineContent {
    pub const PRIORITY: i32 = 1;

    pub fn new(content: Value) -> Self {
        Self { content }
    }
}

#[async_trait::async_trait]
impl FallbackStrategy for OfflineContent {
    fn name(&self) -> &str {
        "offline_content"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn can_handle(&self, error: &SystemError, _ctx: &ErrorContext) -> bool {
        error.recoverable
    }

    async fn execute(&self, ctx: &ErrorContext) -> anyhow::Result<Value> {
        debug!(operation = %ctx.operation, "Serving offline content");
        Ok(serde_json::json!({
            "offline": true,
            "data": self.content.clone(),
        }))
    }
}
