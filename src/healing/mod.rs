//! Self-healing engine
//!
//! Holds a registry of pluggable healing strategies, classifies incoming
//! errors into a coarse category, and tries eligible strategies in priority
//! order to remediate the cause of the error rather than retrying the call.
//! Repeated failures for the same (category, component) pair escalate after
//! a bounded number of attempts.

pub mod strategies;

use crate::config::HealingConfig;
use crate::context::ErrorContext;
use crate::errors::{ErrorCategory, ResilienceError, SystemError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// A pluggable remediation capability.
///
/// Strategies remediate the *cause* of an error (reconnect a pool, clear
/// memory, recycle a socket), not the failed call itself. `heal` may run
/// its own bounded retries internally; that policy is local to the
/// strategy, not the engine.
#[async_trait::async_trait]
pub trait HealingStrategy: Send + Sync {
    /// Strategy name for logs and history.
    fn name(&self) -> &str;

    /// Higher priority strategies are tried first.
    fn priority(&self) -> i32;

    /// Whether this strategy applies to the given error.
    fn can_handle(&self, error: &SystemError, ctx: &ErrorContext) -> bool;

    /// Attempt remediation. Returning `Ok` means the cause is believed fixed.
    async fn heal(&self, error: &SystemError, ctx: &ErrorContext) -> anyhow::Result<()>;
}

/// Outcome of a successful healing pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingOutcome {
    pub category: ErrorCategory,
    pub strategy: String,
    pub duration_ms: u64,
}

/// Escalation raised when a (category, component) pair exhausts its
/// healing attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationEvent {
    pub category: ErrorCategory,
    pub component: String,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

/// Engine statistics.
#[derive(Debug, Default)]
struct EngineStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    escalations: AtomicU64,
}

/// Serializable engine summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingSummary {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub escalations: u64,
    pub registered_strategies: usize,
    pub success_rate: f64,
}

/// Single healing record retained for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingRecord {
    pub category: ErrorCategory,
    pub component: String,
    pub strategy: Option<String>,
    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

pub struct SelfHealingEngine {
    config: HealingConfig,
    strategies: RwLock<Vec<Arc<dyn HealingStrategy>>>,
    /// Failed-healing counters keyed by (category, component)
    attempt_counts: RwLock<HashMap<(ErrorCategory, String), u32>>,
    escalations: RwLock<VecDeque<EscalationEvent>>,
    history: RwLock<VecDeque<HealingRecord>>,
    stats: EngineStats,
}

impl SelfHealingEngine {
    pub fn new(config: HealingConfig) -> Self {
        Self {
            config,
            strategies: RwLock::new(Vec::new()),
            attempt_counts: RwLock::new(HashMap::new()),
            escalations: RwLock::new(VecDeque::new()),
            history: RwLock::new(VecDeque::with_capacity(100)),
            stats: EngineStats::default(),
        }
    }

    /// Register a strategy. The list stays sorted by descending priority;
    /// ties keep registration order (stable sort).
    pub fn register(&self, strategy: Arc<dyn HealingStrategy>) {
        let mut strategies = self.strategies.write();
        debug!(strategy = strategy.name(), priority = strategy.priority(), "Registering healing strategy");
        strategies.push(strategy);
        strategies.sort_by_key(|s| std::cmp::Reverse(s.priority()));
    }

    /// Classify the error, enforce the attempt cap, and try eligible
    /// strategies in priority order.
    pub async fn handle_error(
        &self,
        error: &SystemError,
        ctx: &ErrorContext,
    ) -> Result<HealingOutcome, ResilienceError> {
        if !self.config.enabled {
            return Err(ResilienceError::HealingFailed {
                category: "disabled".to_string(),
                component: ctx.component.clone(),
                reason: "Self-healing is disabled".to_string(),
            });
        }

        let category = ErrorCategory::classify(error);
        let key = (category, ctx.component.clone());

        let attempts_so_far = {
            let counts = self.attempt_counts.read();
            counts.get(&key).copied().unwrap_or(0)
        };

        if attempts_so_far >= self.config.max_healing_attempts {
            self.escalate(category, &ctx.component, attempts_so_far);
            return Err(ResilienceError::HealingFailed {
                category: category.to_string(),
                component: ctx.component.clone(),
                reason: format!(
                    "Escalated after {} failed healing attempts",
                    attempts_so_far
                ),
            });
        }

        self.stats.attempts.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let eligible: Vec<Arc<dyn HealingStrategy>> = {
            let strategies = self.strategies.read();
            strategies
                .iter()
                .filter(|s| s.can_handle(error, ctx))
                .cloned()
                .collect()
        };

        if eligible.is_empty() {
            debug!(category = %category, component = %ctx.component, "No healing strategy applies");
        }

        for strategy in &eligible {
            debug!(strategy = strategy.name(), category = %category, "Attempting healing strategy");
            match strategy.heal(error, ctx).await {
                Ok(()) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    info!(
                        strategy = strategy.name(),
                        category = %category,
                        component = %ctx.component,
                        duration_ms,
                        "Healing succeeded"
                    );
                    self.stats.successes.fetch_add(1, Ordering::Relaxed);
                    self.attempt_counts.write().remove(&key);
                    self.record(category, &ctx.component, Some(strategy.name()), true, duration_ms);
                    return Ok(HealingOutcome {
                        category,
                        strategy: strategy.name().to_string(),
                        duration_ms,
                    });
                }
                Err(e) => {
                    warn!(
                        strategy = strategy.name(),
                        category = %category,
                        error = %e,
                        "Healing strategy failed"
                    );
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        *self.attempt_counts.write().entry(key).or_insert(0) += 1;
        self.record(category, &ctx.component, None, false, duration_ms);

        Err(ResilienceError::HealingFailed {
            category: category.to_string(),
            component: ctx.component.clone(),
            reason: if eligible.is_empty() {
                "No applicable strategy".to_string()
            } else {
                format!("All {} eligible strategies failed", eligible.len())
            },
        })
    }

    fn escalate(&self, category: ErrorCategory, component: &str, attempts: u32) {
        error!(
            category = %category,
            component = %component,
            attempts,
            "Healing attempts exhausted, escalating"
        );
        self.stats.escalations.fetch_add(1, Ordering::Relaxed);

        let mut escalations = self.escalations.write();
        escalations.push_back(EscalationEvent {
            category,
            component: component.to_string(),
            attempts,
            timestamp: Utc::now(),
        });
        while escalations.len() > self.config.max_escalations {
            escalations.pop_front();
        }
    }

    fn record(
        &self,
        category: ErrorCategory,
        component: &str,
        strategy: Option<&str>,
        success: bool,
        duration_ms: u64,
    ) {
        let mut history = self.history.write();
        history.push_back(HealingRecord {
            category,
            component: component.to_string(),
            strategy: strategy.map(String::from),
            success,
            duration_ms,
            timestamp: Utc::now(),
        });
        while history.len() > 100 {
            history.pop_front();
        }
    }

    /// Escalation events, oldest first.
    pub fn escalations(&self) -> Vec<EscalationEvent> {
        self.escalations.read().iter().cloned().collect()
    }

    /// Healing history, oldest first.
    pub fn history(&self) -> Vec<HealingRecord> {
        self.history.read().iter().cloned().collect()
    }

    /// Failed healing attempts recorded for a (category, component) pair.
    pub fn attempts_used(&self, category: ErrorCategory, component: &str) -> u32 {
        self.attempt_counts
            .read()
            .get(&(category, component.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn strategy_count(&self) -> usize {
        self.strategies.read().len()
    }

    pub fn summary(&self) -> HealingSummary {
        let attempts = self.stats.attempts.load(Ordering::Relaxed);
        let successes = self.stats.successes.load(Ordering::Relaxed);
        HealingSummary {
            attempts,
            successes,
            failures: self.stats.failures.load(Ordering::Relaxed),
            escalations: self.stats.escalations.load(Ordering::Relaxed),
            registered_strategies: self.strategy_count(),
            success_rate: if attempts > 0 {
                successes as f64 / attempts as f64
            } else {
                0.0
            },
        }
    }

    /// Clear counters, history, and escalations. Strategies stay registered.
    pub fn reset(&self) {
        self.attempt_counts.write().clear();
        self.escalations.write().clear();
        self.history.write().clear();
        self.stats.attempts.store(0, Ordering::Relaxed);
        self.stats.successes.store(0, Ordering::Relaxed);
        self.stats.failures.store(0, Ordering::Relaxed);
        self.stats.escalations.store(0, Ordering::Relaxed);
    }
}

impl Default for SelfHealingEngine {
    fn default() -> Self {
        Self::new(HealingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FixedStrategy {
        name: String,
        priority: i32,
        succeed: bool,
        calls: AtomicU32,
    }

    impl FixedStrategy {
        fn new(name: &str, priority: i32, succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                priority,
                succeed,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl HealingStrategy for FixedStrategy {
        fn name(&self) -> &str {
            &self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn can_handle(&self, _: &SystemError, _: &ErrorContext) -> bool {
            true
        }
        async fn heal(&self, _: &SystemError, _: &ErrorContext) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok(())
            } else {
                anyhow::bail!("heal failed")
            }
        }
    }

    fn db_error() -> SystemError {
        SystemError::new(
            "DB_LOST",
            "database connection lost",
            crate::errors::Severity::High,
            "database",
        )
    }

    fn ctx() -> ErrorContext {
        ErrorContext::new("database", "query")
    }

    #[tokio::test]
    async fn test_successful_healing_returns_outcome() {
        let engine = SelfHealingEngine::default();
        engine.register(FixedStrategy::new("reconnect", 10, true));

        let outcome = engine.handle_error(&db_error(), &ctx()).await.unwrap();
        assert_eq!(outcome.strategy, "reconnect");
        assert_eq!(outcome.category, ErrorCategory::DatabaseConnection);
    }

    #[tokio::test]
    async fn test_priority_order_first_success_wins() {
        let engine = SelfHealingEngine::default();
        let low = FixedStrategy::new("low", 1, true);
        let high = FixedStrategy::new("high", 10, true);
        // Register low first: priority must still win
        engine.register(low.clone());
        engine.register(high.clone());

        let outcome = engine.handle_error(&db_error(), &ctx()).await.unwrap();
        assert_eq!(outcome.strategy, "high");
        assert_eq!(high.calls.load(Ordering::SeqCst), 1);
        assert_eq!(low.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_falls_through_failing_strategies() {
        let engine = SelfHealingEngine::default();
        let first = FixedStrategy::new("first", 10, false);
        let second = FixedStrategy::new("second", 5, true);
        engine.register(first.clone());
        engine.register(second.clone());

        let outcome = engine.handle_error(&db_error(), &ctx()).await.unwrap();
        assert_eq!(outcome.strategy, "second");
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_increments_counter_then_escalates() {
        let engine = SelfHealingEngine::default();
        engine.register(FixedStrategy::new("never", 10, false));

        // max_healing_attempts = 3 failing passes, then escalation on the 4th
        for _ in 0..3 {
            assert!(engine.handle_error(&db_error(), &ctx()).await.is_err());
        }
        assert_eq!(
            engine.attempts_used(ErrorCategory::DatabaseConnection, "database"),
            3
        );

        let err = engine.handle_error(&db_error(), &ctx()).await.unwrap_err();
        assert!(matches!(err, ResilienceError::HealingFailed { .. }));
        assert_eq!(engine.escalations().len(), 1);
        assert_eq!(engine.escalations()[0].attempts, 3);

        // Counter stops incrementing once escalated
        let _ = engine.handle_error(&db_error(), &ctx()).await;
        assert_eq!(
            engine.attempts_used(ErrorCategory::DatabaseConnection, "database"),
            3
        );
    }

    #[tokio::test]
    async fn test_success_clears_attempt_counter() {
        let engine = SelfHealingEngine::default();
        let flaky = FixedStrategy::new("flaky", 10, false);
        engine.register(flaky);
        let _ = engine.handle_error(&db_error(), &ctx()).await;
        assert_eq!(
            engine.attempts_used(ErrorCategory::DatabaseConnection, "database"),
            1
        );

        engine.register(FixedStrategy::new("fixer", 20, true));
        engine.handle_error(&db_error(), &ctx()).await.unwrap();
        assert_eq!(
            engine.attempts_used(ErrorCategory::DatabaseConnection, "database"),
            0
        );
    }

    #[tokio::test]
    async fn test_no_applicable_strategy_fails() {
        struct Never;
        #[async_trait::async_trait]
        impl HealingStrategy for Never {
            fn name(&self) -> &str {
                "never"
            }
            fn priority(&self) -> i32 {
                1
            }
            fn can_handle(&self, _: &SystemError, _: &ErrorContext) -> bool {
                false
            }
            async fn heal(&self, _: &SystemError, _: &ErrorContext) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let engine = SelfHealingEngine::default();
        engine.register(Arc::new(Never));
        let err = engine.handle_error(&db_error(), &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("No applicable strategy"));
    }

    #[tokio::test]
    async fn test_disabled_engine_refuses() {
        let engine = SelfHealingEngine::new(HealingConfig {
            enabled: false,
            ..Default::default()
        });
        engine.register(FixedStrategy::new("reconnect", 10, true));
        assert!(engine.handle_error(&db_error(), &ctx()).await.is_err());
    }

    #[tokio::test]
    async fn test_counters_are_per_component() {
        let engine = SelfHealingEngine::default();
        engine.register(FixedStrategy::new("never", 10, false));

        let _ = engine.handle_error(&db_error(), &ctx()).await;
        let other = ErrorContext::new("replica", "query");
        let _ = engine.handle_error(&db_error(), &other).await;

        assert_eq!(
            engine.attempts_used(ErrorCategory::DatabaseConnection, "database"),
            1
        );
        assert_eq!(
            engine.attempts_used(ErrorCategory::DatabaseConnection, "replica"),
            1
        );
    }

    #[tokio::test]
    async fn test_summary_tracks_rates() {
        let engine = SelfHealingEngine::default();
        engine.register(FixedStrategy::new("fix", 10, true));
        engine.handle_error(&db_error(), &ctx()).await.unwrap();

        let summary = engine.summary();
        assert_eq!(summary.attempts, 1);
        assert_eq!(summary.successes, 1);
        assert!((summary.success_rate - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_reset_zeroes_everything() {
        let engine = SelfHealingEngine::default();
        engine.register(FixedStrategy::new("never", 10, false));
        let _ = engine.handle_error(&db_error(), &ctx()).await;

        engine.reset();
        let summary = engine.summary();
        assert_eq!(summary.attempts, 0);
        assert_eq!(summary.failures, 0);
        assert!(engine.history().is_empty());
        // Strategies survive reset
        assert_eq!(engine.strategy_count(), 1);
    }
}
