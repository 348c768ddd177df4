//! Fallback chain executor
//!
//! Holds per-operation-type ordered lists of degraded-service strategies.
//! When the primary operation fails, eligible strategies run in descending
//! priority order until one produces a result; exhaustion surfaces a
//! `FallbackExhausted` error wrapping the original failure.

pub mod strategies;
pub mod tracker;

use crate::config::FallbackConfig;
use crate::context::{ErrorContext, Operation};
use crate::errors::{ResilienceError, SystemError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub use tracker::{PerformanceTracker, StrategyPerformance};

/// A degraded-service alternative to a failed primary operation.
///
/// Strategies serve cached or simplified results rather than replicating
/// the primary operation.
#[async_trait::async_trait]
pub trait FallbackStrategy: Send + Sync {
    /// Strategy name for logs and metrics.
    fn name(&self) -> &str;

    /// Higher priority strategies are tried first.
    fn priority(&self) -> i32;

    /// Whether this strategy applies to the given failure.
    fn can_handle(&self, error: &SystemError, ctx: &ErrorContext) -> bool;

    /// Produce a degraded result.
    async fn execute(&self, ctx: &ErrorContext) -> anyhow::Result<Value>;
}

/// Result of a fallback chain pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackOutcome {
    pub value: Value,
    /// Which strategy produced the value; `None` means the primary succeeded
    pub strategy: Option<String>,
    pub duration_ms: u64,
}

/// Serializable chain summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackSummary {
    pub operation_types: Vec<String>,
    pub total_strategies: usize,
    pub strategies: Vec<StrategyPerformance>,
}

pub struct FallbackChain {
    registry: RwLock<HashMap<String, Vec<Arc<dyn FallbackStrategy>>>>,
    tracker: PerformanceTracker,
}

impl FallbackChain {
    pub fn new(config: FallbackConfig) -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            tracker: PerformanceTracker::new(config.error_ring_size),
        }
    }

    /// Register a strategy under an operation type. Lists stay sorted by
    /// descending priority; ties keep registration order (stable sort).
    pub fn register(&self, operation_type: &str, strategy: Arc<dyn FallbackStrategy>) {
        let mut registry = self.registry.write();
        debug!(
            operation_type,
            strategy = strategy.name(),
            priority = strategy.priority(),
            "Registering fallback strategy"
        );
        let list = registry.entry(operation_type.to_string()).or_default();
        list.push(strategy);
        list.sort_by_key(|s| std::cmp::Reverse(s.priority()));
    }

    /// Run the primary operation; on failure walk the chain for its type.
    pub async fn execute_with_fallback(
        &self,
        operation: &Operation,
        operation_type: &str,
        ctx: &ErrorContext,
    ) -> Result<FallbackOutcome, ResilienceError> {
        let started = Instant::now();

        let primary_error = match operation().await {
            Ok(value) => {
                return Ok(FallbackOutcome {
                    value,
                    strategy: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            }
            Err(e) => e,
        };

        warn!(
            operation_type,
            error = %primary_error,
            "Primary operation failed, walking fallback chain"
        );
        self.execute_chain(&primary_error, operation_type, ctx, started)
            .await
    }

    /// Walk the chain for an already-failed operation.
    pub async fn recover(
        &self,
        error: &SystemError,
        operation_type: &str,
        ctx: &ErrorContext,
    ) -> Result<FallbackOutcome, ResilienceError> {
        self.execute_chain(error, operation_type, ctx, Instant::now())
            .await
    }

    async fn execute_chain(
        &self,
        error: &SystemError,
        operation_type: &str,
        ctx: &ErrorContext,
        started: Instant,
    ) -> Result<FallbackOutcome, ResilienceError> {
        let eligible: Vec<Arc<dyn FallbackStrategy>> = {
            let registry = self.registry.read();
            registry
                .get(operation_type)
                .map(|list| {
                    list.iter()
                        .filter(|s| s.can_handle(error, ctx))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        for strategy in &eligible {
            let attempt_start = Instant::now();
            debug!(strategy = strategy.name(), operation_type, "Trying fallback strategy");
            match strategy.execute(ctx).await {
                Ok(value) => {
                    let attempt_duration = attempt_start.elapsed();
                    self.tracker.record_success(strategy.name(), attempt_duration);
                    info!(
                        strategy = strategy.name(),
                        operation_type,
                        duration_ms = attempt_duration.as_millis() as u64,
                        "Fallback strategy succeeded"
                    );
                    return Ok(FallbackOutcome {
                        value,
                        strategy: Some(strategy.name().to_string()),
                        duration_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Err(e) => {
                    self.tracker.record_failure(
                        strategy.name(),
                        attempt_start.elapsed(),
                        &e.to_string(),
                    );
                    warn!(
                        strategy = strategy.name(),
                        operation_type,
                        error = %e,
                        "Fallback strategy failed"
                    );
                }
            }
        }

        warn!(operation_type, tried = eligible.len(), "Fallback chain exhausted");
        Err(ResilienceError::FallbackExhausted {
            operation_type: operation_type.to_string(),
            original: error.to_string(),
        })
    }

    /// Registered strategy names for an operation type, priority order.
    pub fn strategies_for(&self, operation_type: &str) -> Vec<String> {
        self.registry
            .read()
            .get(operation_type)
            .map(|list| list.iter().map(|s| s.name().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn tracker(&self) -> &PerformanceTracker {
        &self.tracker
    }

    pub fn summary(&self) -> FallbackSummary {
        let registry = self.registry.read();
        let mut operation_types: Vec<String> = registry.keys().cloned().collect();
        operation_types.sort();
        FallbackSummary {
            total_strategies: registry.values().map(Vec::len).sum(),
            operation_types,
            strategies: self.tracker.all(),
        }
    }

    /// Clear performance stats. Registrations survive.
    pub fn reset(&self) {
        self.tracker.reset();
    }
}

impl Default for FallbackChain {
    fn default() -> Self {
        Self::new(FallbackConfig::default())
    }
}
