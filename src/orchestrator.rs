//! Recovery orchestration
//!
//! The orchestrator sequences the full pipeline for a raised error:
//! predict → self-heal → breaker check → fallback → bounded retry, under
//! one overall timeout, with a concurrency cap and per-key deduplication
//! enforced atomically at entry. It never raises to its caller: every path
//! resolves to a [`RecoveryResult`].
//!
//! [`ResilienceService`] is the caller-facing facade that owns one circuit
//! breaker per protected-operation category and wires the orchestrator to
//! the healing engine, fallback chain, and predictor.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
use crate::clock::SharedClock;
use crate::config::{OrchestratorConfig, ResilienceConfig};
use crate::context::{ErrorContext, Operation};
use crate::errors::{ErrorCategory, ResilienceError, SystemError};
use crate::fallback::{FallbackChain, FallbackSummary};
use crate::healing::{HealingSummary, SelfHealingEngine};
use crate::history::{RecoveryAttempt, RecoveryHistory};
use crate::predictor::{ErrorPredictor, MetricsSource, PredictorSummary, RiskLevel};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Final status of one orchestrated recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    /// The error's cause was remediated
    Healed,
    /// A degraded or retried result was produced
    Recovered,
    /// The circuit for this category is open; come back later
    CircuitOpen,
    /// Every stage failed
    Failed,
    /// The same recovery is already running
    InProgress,
}

/// Which stage produced a successful recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMethod {
    SelfHealing,
    Fallback,
    Retry,
}

impl RecoveryMethod {
    fn as_str(&self) -> &'static str {
        match self {
            Self::SelfHealing => "self_healing",
            Self::Fallback => "fallback",
            Self::Retry => "retry",
        }
    }
}

/// Outcome of `orchestrate_recovery`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub id: String,
    pub status: RecoveryStatus,
    pub method: Option<RecoveryMethod>,
    pub duration_ms: u64,
    /// Retry attempts actually made against the original operation
    pub attempts: u32,
    pub result: Option<Value>,
    pub final_error: Option<String>,
    /// Remaining breaker cooldown when `status == CircuitOpen`
    pub wait_time_ms: Option<u64>,
}

impl RecoveryResult {
    fn new(id: &str, status: RecoveryStatus) -> Self {
        Self {
            id: id.to_string(),
            status,
            method: None,
            duration_ms: 0,
            attempts: 0,
            result: None,
            final_error: None,
            wait_time_ms: None,
        }
    }
}

#[derive(Debug, Default)]
struct StatsInner {
    total: u64,
    successes: u64,
    failures: u64,
    deduplicated: u64,
    rejected_at_cap: u64,
    method_counts: HashMap<String, u64>,
    avg_duration_ms: f64,
}

/// Serializable orchestrator summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSummary {
    pub total_recoveries: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub method_counts: HashMap<String, u64>,
    pub deduplicated: u64,
    pub rejected_at_cap: u64,
    pub in_flight: usize,
}

/// One circuit breaker per protected-operation category, selected by
/// keyword match on the operation type. Defaults to `api`.
pub struct BreakerRegistry {
    breakers: HashMap<&'static str, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub const CATEGORIES: [&'static str; 4] = ["database", "api", "voice", "ai"];

    pub fn new(config: &ResilienceConfig, clock: SharedClock) -> Self {
        let breakers = Self::CATEGORIES
            .iter()
            .map(|name| {
                (
                    *name,
                    Arc::new(CircuitBreaker::new(name, config.circuit, clock.clone())),
                )
            })
            .collect();
        Self { breakers }
    }

    /// Route an operation type to its category breaker.
    pub fn select(&self, operation_type: &str) -> Arc<CircuitBreaker> {
        // Match whole words only; bare substring checks misroute names like
        // "feedback" (contains "db") or "email_send" (contains "ai").
        let lowered = operation_type.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        let has = |keywords: &[&str]| tokens.iter().any(|t| keywords.contains(t));
        let category = if has(&["database", "db", "sql"]) {
            "database"
        } else if has(&["voice", "audio"]) {
            "voice"
        } else if has(&["ai", "tutor", "tutoring", "llm"]) {
            "ai"
        } else {
            "api"
        };
        // Registry is built with all categories present
        Arc::clone(&self.breakers[category])
    }

    pub fn get(&self, category: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(category).cloned()
    }

    pub fn open_circuit_count(&self) -> usize {
        self.breakers
            .values()
            .filter(|b| b.state() == CircuitState::Open)
            .count()
    }

    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut out: Vec<_> = self.breakers.values().map(|b| b.snapshot()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.values() {
            breaker.reset();
        }
    }
}

pub struct RecoveryOrchestrator {
    config: OrchestratorConfig,
    healing: Arc<SelfHealingEngine>,
    fallback: Arc<FallbackChain>,
    predictor: Arc<ErrorPredictor>,
    breakers: Arc<BreakerRegistry>,
    in_flight: Mutex<HashSet<String>>,
    stats: Mutex<StatsInner>,
    history: RecoveryHistory,
}

impl RecoveryOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        healing: Arc<SelfHealingEngine>,
        fallback: Arc<FallbackChain>,
        predictor: Arc<ErrorPredictor>,
        breakers: Arc<BreakerRegistry>,
    ) -> Self {
        Self {
            history: RecoveryHistory::new(config.history_per_key, config.history_global),
            config,
            healing,
            fallback,
            predictor,
            breakers,
            in_flight: Mutex::new(HashSet::new()),
            stats: Mutex::new(StatsInner::default()),
        }
    }

    /// Deterministic recovery key for deduplication.
    pub fn recovery_id(error: &SystemError) -> String {
        format!(
            "{}:{}:{}",
            error.component,
            error.code,
            error.timestamp.timestamp_millis()
        )
    }

    /// Run the recovery pipeline for a raised error.
    ///
    /// Never raises: all failures fold into the returned result. The
    /// overall timeout discards whatever the pipeline was doing and
    /// surfaces `Failed`; in-progress strategies are not aborted mid-step.
    pub async fn orchestrate_recovery(
        &self,
        error: &SystemError,
        ctx: &ErrorContext,
    ) -> RecoveryResult {
        let id = Self::recovery_id(error);
        let started = Instant::now();

        // Cap and dedup checks share one lock acquisition; no await happens
        // between check and insert, so callers never observe a half-updated
        // in-flight set.
        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.contains(&id) {
                debug!(recovery_id = %id, "Recovery already in flight");
                self.stats.lock().deduplicated += 1;
                return RecoveryResult::new(&id, RecoveryStatus::InProgress);
            }
            if in_flight.len() >= self.config.max_concurrent_recoveries {
                warn!(
                    recovery_id = %id,
                    cap = self.config.max_concurrent_recoveries,
                    "Concurrent recovery cap reached, rejecting"
                );
                self.stats.lock().rejected_at_cap += 1;
                let mut result = RecoveryResult::new(&id, RecoveryStatus::Failed);
                result.final_error = Some("Concurrent recovery limit reached".to_string());
                return result;
            }
            in_flight.insert(id.clone());
        }

        info!(
            recovery_id = %id,
            component = %error.component,
            code = %error.code,
            "Starting recovery"
        );

        let outcome =
            tokio::time::timeout(self.config.recovery_timeout(), self.run_pipeline(&id, error, ctx))
                .await;

        self.in_flight.lock().remove(&id);

        let mut result = match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(recovery_id = %id, "Recovery timed out");
                let mut result = RecoveryResult::new(&id, RecoveryStatus::Failed);
                result.final_error = Some(
                    ResilienceError::Timeout {
                        seconds: self.config.recovery_timeout_secs,
                    }
                    .to_string(),
                );
                result
            }
        };
        result.duration_ms = started.elapsed().as_millis() as u64;

        self.finish(&id, error, &result);
        result
    }

    async fn run_pipeline(
        &self,
        id: &str,
        error: &SystemError,
        ctx: &ErrorContext,
    ) -> RecoveryResult {
        // Stage 1: prediction and best-effort prevention
        if self.config.enable_predictive {
            self.predict_and_prevent(id).await;
        }

        // Stage 2: self-healing
        match self.healing.handle_error(error, ctx).await {
            Ok(outcome) => {
                info!(recovery_id = %id, strategy = %outcome.strategy, "Recovered by healing");
                let mut result = RecoveryResult::new(id, RecoveryStatus::Healed);
                result.method = Some(RecoveryMethod::SelfHealing);
                return result;
            }
            Err(e) => {
                debug!(recovery_id = %id, error = %e, "Self-healing did not resolve the error");
            }
        }

        // Stage 3: circuit breaker check for this category
        let breaker = self.breakers.select(&ctx.operation);
        if breaker.state() == CircuitState::Open {
            let wait = breaker.remaining_wait_ms();
            if wait > 0 {
                info!(recovery_id = %id, breaker = breaker.name(), wait_time_ms = wait, "Circuit open");
                let mut result = RecoveryResult::new(id, RecoveryStatus::CircuitOpen);
                result.wait_time_ms = Some(wait);
                return result;
            }
        }

        // Stage 4: fallback chain
        match self.fallback.recover(error, &ctx.operation, ctx).await {
            Ok(outcome) => {
                let mut result = RecoveryResult::new(id, RecoveryStatus::Recovered);
                result.method = Some(RecoveryMethod::Fallback);
                result.result = Some(outcome.value);
                return result;
            }
            Err(e) => {
                debug!(recovery_id = %id, error = %e, "Fallback chain exhausted");
            }
        }

        // Stage 5: bounded retry of the original operation through the breaker
        let mut attempts = 0;
        let mut last_error = error.to_string();
        if let Some(op) = &ctx.original_operation {
            for attempt in 1..=self.config.retry_attempts {
                let delay = self.jittered(self.config.retry_delay(attempt));
                debug!(recovery_id = %id, attempt, delay_ms = delay.as_millis() as u64, "Retrying original operation");
                tokio::time::sleep(delay).await;
                attempts = attempt;

                match breaker.call(|| op()).await {
                    Ok(value) => {
                        info!(recovery_id = %id, attempt, "Retry succeeded");
                        let mut result = RecoveryResult::new(id, RecoveryStatus::Recovered);
                        result.method = Some(RecoveryMethod::Retry);
                        result.result = Some(value);
                        result.attempts = attempts;
                        return result;
                    }
                    Err(ResilienceError::CircuitOpen { retry_after_ms }) => {
                        warn!(recovery_id = %id, "Circuit opened during retries");
                        let mut result = RecoveryResult::new(id, RecoveryStatus::CircuitOpen);
                        result.wait_time_ms = Some(retry_after_ms);
                        result.attempts = attempts;
                        return result;
                    }
                    Err(e) => {
                        last_error = e.to_string();
                    }
                }
            }
        } else {
            debug!(recovery_id = %id, "No original operation to retry");
        }

        let mut result = RecoveryResult::new(id, RecoveryStatus::Failed);
        result.attempts = attempts;
        result.final_error = Some(last_error);
        result
    }

    async fn predict_and_prevent(&self, id: &str) {
        let prediction = match self.predictor.analyze().await {
            Ok(p) => p,
            Err(e) => {
                // Prediction is advisory; collection failures never stall recovery
                warn!(recovery_id = %id, error = %e, "Prediction pass failed");
                return;
            }
        };

        if prediction.risk_level >= RiskLevel::High {
            warn!(
                recovery_id = %id,
                risk_score = prediction.risk_score,
                risk_level = ?prediction.risk_level,
                "Elevated failure risk, firing preventive actions"
            );
            let actions = prediction.preventive_actions.clone();
            tokio::spawn(async move {
                for action in actions {
                    info!(action = %action, "Preventive action");
                }
            });
        }
    }

    fn jittered(&self, base: std::time::Duration) -> std::time::Duration {
        // ±10% to avoid synchronized retry stampedes
        let factor = rand::rng().random_range(0.9..=1.1);
        base.mul_f64(factor)
    }

    fn finish(&self, id: &str, error: &SystemError, result: &RecoveryResult) {
        let succeeded = matches!(
            result.status,
            RecoveryStatus::Healed | RecoveryStatus::Recovered
        );

        {
            let mut stats = self.stats.lock();
            stats.total += 1;
            if succeeded {
                stats.successes += 1;
            } else {
                stats.failures += 1;
            }
            if let Some(method) = result.method {
                *stats.method_counts.entry(method.as_str().to_string()).or_insert(0) += 1;
            }
            let n = stats.total as f64;
            stats.avg_duration_ms += (result.duration_ms as f64 - stats.avg_duration_ms) / n;
        }

        let category = ErrorCategory::classify(error);
        self.history.record(
            id,
            category.as_str(),
            result
                .method
                .map(|m| m.as_str())
                .unwrap_or(match result.status {
                    RecoveryStatus::CircuitOpen => "circuit_open",
                    _ => "none",
                }),
            succeeded,
            result.duration_ms,
        );

        info!(
            recovery_id = %id,
            status = ?result.status,
            method = ?result.method,
            duration_ms = result.duration_ms,
            "Recovery finished"
        );
    }

    /// Attempts recorded for one recovery key, oldest first.
    pub fn history_for(&self, id: &str) -> Vec<RecoveryAttempt> {
        self.history.for_key(id)
    }

    pub fn history(&self) -> &RecoveryHistory {
        &self.history
    }

    pub fn summary(&self) -> OrchestratorSummary {
        // The entry path locks in_flight before stats; read in_flight first
        // (and release it) so the two never interleave in opposite order.
        let in_flight = self.in_flight.lock().len();
        let stats = self.stats.lock();
        OrchestratorSummary {
            total_recoveries: stats.total,
            successes: stats.successes,
            failures: stats.failures,
            success_rate: if stats.total > 0 {
                stats.successes as f64 / stats.total as f64
            } else {
                0.0
            },
            avg_duration_ms: stats.avg_duration_ms,
            method_counts: stats.method_counts.clone(),
            deduplicated: stats.deduplicated,
            rejected_at_cap: stats.rejected_at_cap,
            in_flight,
        }
    }

    /// Clear stats and history. In-flight tracking is untouched.
    pub fn reset(&self) {
        *self.stats.lock() = StatsInner::default();
        self.history.clear();
    }
}

/// Overall system health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Critical,
}

/// Aggregated health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub overall: HealthState,
    pub open_circuits: usize,
    pub breakers: Vec<CircuitBreakerSnapshot>,
    pub orchestrator: OrchestratorSummary,
    pub healing: HealingSummary,
    pub fallback: FallbackSummary,
    pub predictor: PredictorSummary,
}

/// Everything at once, for dashboards and operational tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComprehensiveMetrics {
    pub breakers: Vec<CircuitBreakerSnapshot>,
    pub orchestrator: OrchestratorSummary,
    pub healing: HealingSummary,
    pub fallback: FallbackSummary,
    pub predictor: PredictorSummary,
}

/// Caller-facing facade over the whole resilience core.
///
/// Construct one per process and pass it by reference; tests build fresh
/// instances instead of resetting shared state.
pub struct ResilienceService {
    breakers: Arc<BreakerRegistry>,
    healing: Arc<SelfHealingEngine>,
    fallback: Arc<FallbackChain>,
    predictor: Arc<ErrorPredictor>,
    orchestrator: RecoveryOrchestrator,
}

impl ResilienceService {
    pub fn new(config: ResilienceConfig, metrics: Arc<dyn MetricsSource>) -> Self {
        Self::with_clock(config, metrics, crate::clock::system_clock())
    }

    pub fn with_clock(
        config: ResilienceConfig,
        metrics: Arc<dyn MetricsSource>,
        clock: SharedClock,
    ) -> Self {
        let breakers = Arc::new(BreakerRegistry::new(&config, clock));
        let healing = Arc::new(SelfHealingEngine::new(config.healing));
        let fallback = Arc::new(FallbackChain::new(config.fallback));
        let predictor = Arc::new(ErrorPredictor::new(config.predictor, metrics));
        let orchestrator = RecoveryOrchestrator::new(
            config.orchestrator,
            healing.clone(),
            fallback.clone(),
            predictor.clone(),
            breakers.clone(),
        );
        Self {
            breakers,
            healing,
            fallback,
            predictor,
            orchestrator,
        }
    }

    /// Run an operation through the matching circuit breaker; on failure,
    /// convert the error and attempt orchestrated recovery.
    ///
    /// `Healed` re-runs the operation once through the breaker;
    /// `Recovered` returns the recovered value transparently. Anything
    /// else re-raises the original error — recovery failure is never
    /// swallowed.
    pub async fn execute_with_resilience(
        &self,
        op: Operation,
        operation_type: &str,
        ctx: &ErrorContext,
    ) -> Result<Value, ResilienceError> {
        let breaker = self.breakers.select(operation_type);

        let original = match breaker.call(|| op()).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let error = match &original {
            ResilienceError::Operation(e) => e.clone(),
            other => SystemError::new(
                "OPERATION_FAILED",
                &other.to_string(),
                crate::errors::Severity::Medium,
                &ctx.component,
            ),
        };

        let mut recovery_ctx = ctx.clone();
        if recovery_ctx.operation.is_empty() {
            recovery_ctx.operation = operation_type.to_string();
        }
        if recovery_ctx.original_operation.is_none() {
            recovery_ctx.original_operation = Some(op.clone());
        }

        let recovery = self.recover_from_error(&error, &recovery_ctx).await;
        match recovery.status {
            RecoveryStatus::Recovered => {
                recovery.result.ok_or(original)
            }
            RecoveryStatus::Healed => {
                // Cause fixed; give the real operation one more shot
                match breaker.call(|| op()).await {
                    Ok(value) => Ok(value),
                    Err(_) => Err(original),
                }
            }
            _ => Err(original),
        }
    }

    /// Orchestrator entry point.
    pub async fn recover_from_error(
        &self,
        error: &SystemError,
        ctx: &ErrorContext,
    ) -> RecoveryResult {
        self.orchestrator.orchestrate_recovery(error, ctx).await
    }

    /// Aggregate component health into one report.
    pub fn perform_health_check(&self) -> HealthReport {
        let open_circuits = self.breakers.open_circuit_count();
        let orchestrator = self.orchestrator.summary();

        let overall = if open_circuits > 2 {
            HealthState::Critical
        } else if open_circuits > 0 {
            HealthState::Degraded
        } else if orchestrator.total_recoveries >= 10 && orchestrator.success_rate < 0.5 {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        HealthReport {
            overall,
            open_circuits,
            breakers: self.breakers.snapshots(),
            orchestrator,
            healing: self.healing.summary(),
            fallback: self.fallback.summary(),
            predictor: self.predictor.summary(),
        }
    }

    pub fn comprehensive_metrics(&self) -> ComprehensiveMetrics {
        ComprehensiveMetrics {
            breakers: self.breakers.snapshots(),
            orchestrator: self.orchestrator.summary(),
            healing: self.healing.summary(),
            fallback: self.fallback.summary(),
            predictor: self.predictor.summary(),
        }
    }

    /// Zero every counter and close every breaker. Registered strategies
    /// survive.
    pub fn reset_all(&self) {
        self.breakers.reset_all();
        self.healing.reset();
        self.fallback.reset();
        self.predictor.reset();
        self.orchestrator.reset();
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn healing(&self) -> &SelfHealingEngine {
        &self.healing
    }

    pub fn fallback(&self) -> &FallbackChain {
        &self.fallback
    }

    pub fn predictor(&self) -> &Arc<ErrorPredictor> {
        &self.predictor
    }

    pub fn orchestrator(&self) -> &RecoveryOrchestrator {
        &self.orchestrator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::operation;
    use crate::errors::Severity;
    use crate::fallback::FallbackStrategy;
    use crate::healing::HealingStrategy;
    use crate::predictor::{MetricsSample, StaticMetricsSource};

    fn quiet_metrics() -> Arc<StaticMetricsSource> {
        Arc::new(StaticMetricsSource::new(MetricsSample::default()))
    }

    fn service() -> ResilienceService {
        ResilienceService::new(ResilienceConfig::default(), quiet_metrics())
    }

    fn fast_service() -> ResilienceService {
        let mut config = ResilienceConfig::default();
        config.orchestrator.retry_base_delay_ms = 1;
        config.orchestrator.retry_attempts = 2;
        ResilienceService::new(config, quiet_metrics())
    }

    fn api_error() -> SystemError {
        SystemError::new("API_TIMEOUT", "request timed out", Severity::High, "api")
    }

    fn ctx() -> ErrorContext {
        ErrorContext::new("api", "api_fetch")
    }

    struct AlwaysHeals;
    #[async_trait::async_trait]
    impl HealingStrategy for AlwaysHeals {
        fn name(&self) -> &str {
            "always_heals"
        }
        fn priority(&self) -> i32 {
            10
        }
        fn can_handle(&self, _: &SystemError, _: &ErrorContext) -> bool {
            true
        }
        async fn heal(&self, _: &SystemError, _: &ErrorContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct StaticFallback(Value);
    #[async_trait::async_trait]
    impl FallbackStrategy for StaticFallback {
        fn name(&self) -> &str {
            "static_fallback"
        }
        fn priority(&self) -> i32 {
            5
        }
        fn can_handle(&self, _: &SystemError, _: &ErrorContext) -> bool {
            true
        }
        async fn execute(&self, _: &ErrorContext) -> anyhow::Result<Value> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_recovery_id_is_deterministic() {
        let err = api_error();
        assert_eq!(
            RecoveryOrchestrator::recovery_id(&err),
            RecoveryOrchestrator::recovery_id(&err)
        );
    }

    #[test]
    fn test_breaker_registry_keyword_routing() {
        let registry = BreakerRegistry::new(
            &ResilienceConfig::default(),
            crate::clock::system_clock(),
        );
        assert_eq!(registry.select("database_query").name(), "database");
        assert_eq!(registry.select("voice_session").name(), "voice");
        assert_eq!(registry.select("ai_tutoring").name(), "ai");
        assert_eq!(registry.select("payments").name(), "api");
        // Whole-word matching: these must not catch on embedded "db"/"ai"
        assert_eq!(registry.select("feedback").name(), "api");
        assert_eq!(registry.select("email_send").name(), "api");
    }

    #[tokio::test]
    async fn test_healing_wins_first() {
        let service = service();
        service.healing().register(Arc::new(AlwaysHeals));

        let result = service.recover_from_error(&api_error(), &ctx()).await;
        assert_eq!(result.status, RecoveryStatus::Healed);
        assert_eq!(result.method, Some(RecoveryMethod::SelfHealing));
    }

    #[tokio::test]
    async fn test_fallback_recovers_when_healing_cannot() {
        let service = fast_service();
        service
            .fallback()
            .register("api_fetch", Arc::new(StaticFallback(serde_json::json!("stale"))));

        let result = service.recover_from_error(&api_error(), &ctx()).await;
        assert_eq!(result.status, RecoveryStatus::Recovered);
        assert_eq!(result.method, Some(RecoveryMethod::Fallback));
        assert_eq!(result.result, Some(serde_json::json!("stale")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_via_original_operation() {
        let service = fast_service();
        let context = ctx().with_operation(operation(|| async { Ok(serde_json::json!(7)) }));

        let result = service.recover_from_error(&api_error(), &context).await;
        assert_eq!(result.status, RecoveryStatus::Recovered);
        assert_eq!(result.method, Some(RecoveryMethod::Retry));
        assert_eq!(result.attempts, 1);
        assert_eq!(result.result, Some(serde_json::json!(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_everything_failing_returns_failed() {
        let service = fast_service();
        let context = ctx().with_operation(operation(|| async {
            Err(SystemError::new("E", "still down", Severity::High, "api"))
        }));

        let result = service.recover_from_error(&api_error(), &context).await;
        assert_eq!(result.status, RecoveryStatus::Failed);
        assert_eq!(result.attempts, 2);
        assert!(result.final_error.is_some());
    }

    #[tokio::test]
    async fn test_circuit_open_short_circuits_pipeline() {
        let service = service();
        service.breakers().get("api").unwrap().force_open();

        let result = service.recover_from_error(&api_error(), &ctx()).await;
        assert_eq!(result.status, RecoveryStatus::CircuitOpen);
        assert!(result.wait_time_ms.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_duplicate_recovery_returns_in_progress() {
        let service = Arc::new(fast_service());
        let err = api_error();
        let id = RecoveryOrchestrator::recovery_id(&err);

        // Hold a slot for the same id, then call while it is in flight
        service.orchestrator().in_flight.lock().insert(id.clone());
        let result = service.recover_from_error(&err, &ctx()).await;
        assert_eq!(result.status, RecoveryStatus::InProgress);
        assert_eq!(service.orchestrator().summary().deduplicated, 1);
        service.orchestrator().in_flight.lock().remove(&id);
    }

    #[tokio::test]
    async fn test_concurrency_cap_rejects() {
        let mut config = ResilienceConfig::default();
        config.orchestrator.max_concurrent_recoveries = 1;
        let service = ResilienceService::new(config, quiet_metrics());

        service
            .orchestrator()
            .in_flight
            .lock()
            .insert("other:ID:0".to_string());

        let result = service.recover_from_error(&api_error(), &ctx()).await;
        assert_eq!(result.status, RecoveryStatus::Failed);
        assert!(result
            .final_error
            .as_deref()
            .unwrap()
            .contains("Concurrent recovery limit"));
        assert_eq!(service.orchestrator().summary().rejected_at_cap, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_summary_concurrent_with_admission_completes() {
        let service = Arc::new(fast_service());
        let err = api_error();
        let id = RecoveryOrchestrator::recovery_id(&err);
        // Pin the id in flight so every call below takes the dedup path
        service.orchestrator().in_flight.lock().insert(id.clone());

        let mut tasks = Vec::new();
        for _ in 0..2 {
            let svc = Arc::clone(&service);
            let err = err.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..500 {
                    let result = svc.recover_from_error(&err, &ctx()).await;
                    assert_eq!(result.status, RecoveryStatus::InProgress);
                }
            }));
            let svc = Arc::clone(&service);
            tasks.push(tokio::spawn(async move {
                for _ in 0..500 {
                    assert_eq!(svc.orchestrator().summary().in_flight, 1);
                }
            }));
        }
        let joined = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            futures::future::join_all(tasks),
        )
        .await
        .expect("admission and summary must not block each other");
        for task in joined {
            task.unwrap();
        }
        service.orchestrator().in_flight.lock().remove(&id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_timeout_surfaces_failed() {
        let mut config = ResilienceConfig::default();
        config.orchestrator.recovery_timeout_secs = 1;
        config.orchestrator.retry_base_delay_ms = 10_000;
        let service = ResilienceService::new(config, quiet_metrics());

        let context = ctx().with_operation(operation(|| async { Ok(Value::Null) }));
        let result = service.recover_from_error(&api_error(), &context).await;
        assert_eq!(result.status, RecoveryStatus::Failed);
        assert!(result.final_error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_execute_with_resilience_happy_path() {
        let service = service();
        let value = service
            .execute_with_resilience(
                operation(|| async { Ok(serde_json::json!("ok")) }),
                "api_call",
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!("ok"));
    }

    #[tokio::test]
    async fn test_execute_with_resilience_returns_fallback_value() {
        let service = fast_service();
        service
            .fallback()
            .register("ai_tutoring", Arc::new(StaticFallback(serde_json::json!("cached lesson"))));

        let value = service
            .execute_with_resilience(
                operation(|| async {
                    Err(SystemError::new("E", "model down", Severity::High, "tutor"))
                }),
                "ai_tutoring",
                &ErrorContext::new("tutor", ""),
            )
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!("cached lesson"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_with_resilience_reraises_original_on_failure() {
        let service = fast_service();
        let err = service
            .execute_with_resilience(
                operation(|| async {
                    Err(SystemError::new(
                        "E_ORIG",
                        "primary broken",
                        Severity::High,
                        "api",
                    ))
                }),
                "api_call",
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("primary broken"));
    }

    #[tokio::test]
    async fn test_health_check_degrades_with_open_circuit() {
        let service = service();
        assert_eq!(service.perform_health_check().overall, HealthState::Healthy);

        service.breakers().get("api").unwrap().force_open();
        let report = service.perform_health_check();
        assert_eq!(report.overall, HealthState::Degraded);
        assert_eq!(report.open_circuits, 1);
    }

    #[tokio::test]
    async fn test_health_check_critical_with_three_open() {
        let service = service();
        for category in ["api", "database", "voice"] {
            service.breakers().get(category).unwrap().force_open();
        }
        assert_eq!(service.perform_health_check().overall, HealthState::Critical);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_and_history_update_per_outcome() {
        let service = fast_service();
        service.healing().register(Arc::new(AlwaysHeals));

        let err = api_error();
        let result = service.recover_from_error(&err, &ctx()).await;
        assert_eq!(result.status, RecoveryStatus::Healed);

        let summary = service.orchestrator().summary();
        assert_eq!(summary.total_recoveries, 1);
        assert_eq!(summary.successes, 1);
        assert_eq!(summary.method_counts["self_healing"], 1);

        let attempts = service.orchestrator().history_for(&result.id);
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].success);
        assert_eq!(attempts[0].error_type, "api_timeout");
    }

    #[tokio::test]
    async fn test_reset_all_zeroes_counters() {
        let service = fast_service();
        service.breakers().get("api").unwrap().force_open();
        let _ = service.recover_from_error(&api_error(), &ctx()).await;

        service.reset_all();

        let metrics = service.comprehensive_metrics();
        assert_eq!(metrics.orchestrator.total_recoveries, 0);
        assert_eq!(metrics.healing.attempts, 0);
        assert!(metrics.breakers.iter().all(|b| {
            b.state == CircuitState::Closed && b.total_calls == 0 && b.total_failures == 0
        }));
    }

    #[tokio::test]
    async fn test_comprehensive_metrics_serializes() {
        let service = service();
        let metrics = service.comprehensive_metrics();
        let json = serde_json::to_value(&metrics).unwrap();
        assert!(json["breakers"].as_array().unwrap().len() == 4);
        assert!(json["orchestrator"]["total_recoveries"].is_u64());
    }
}
