//! Mend - Resilience & Recovery Core
//!
//! A fault-tolerance layer for services that must keep responding while
//! their dependencies misbehave. When an operation fails, mend runs it
//! through a recovery pipeline instead of letting the error propagate:
//!
//! - **Circuit breakers**: per-category failure isolation with cooldown
//!   and half-open probing
//! - **Self-healing**: pluggable strategies that fix the cause of an
//!   error (reconnect, retry, clean up) with an escalation cap
//! - **Fallback chains**: priority-ordered degraded responses (cached,
//!   simplified, offline) with per-strategy performance tracking
//! - **Error prediction**: periodic system-metric scans that score
//!   failure risk before anything breaks
//! - **Recovery orchestration**: one entry point sequencing predict →
//!   heal → fallback → retry under a timeout, cap, and deduplication
//!
//! # Quick Start
//!
//! ```ignore
//! use mend::{operation, ErrorContext, ResilienceConfig, ResilienceService};
//!
//! let service = ResilienceService::new(ResilienceConfig::default(), metrics);
//! let ctx = ErrorContext::new("lessons", "fetch_lesson_plan");
//! let value = service
//!     .execute_with_resilience(operation(|| async { fetch().await }), "api_call", &ctx)
//!     .await?;
//! ```

// ─── Core primitives ───────────────────────────────────────────────
pub mod clock;
pub mod config;
pub mod context;
pub mod errors;

// ─── Recovery components ───────────────────────────────────────────
pub mod circuit_breaker;
pub mod fallback;
pub mod healing;
pub mod history;
pub mod predictor;

// ─── Orchestration ─────────────────────────────────────────────────
pub mod orchestrator;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    CircuitBreakerConfig, FallbackConfig, HealingConfig, OrchestratorConfig, PredictorConfig,
    ResilienceConfig,
};
pub use context::{operation, ErrorContext, Operation};
pub use errors::{ErrorCategory, ResilienceError, Severity, SystemError};
pub use fallback::{FallbackChain, FallbackOutcome, FallbackStrategy};
pub use healing::{HealingOutcome, HealingStrategy, SelfHealingEngine};
pub use history::{RecoveryAttempt, RecoveryHistory};
pub use orchestrator::{
    BreakerRegistry, HealthReport, HealthState, RecoveryMethod, RecoveryOrchestrator,
    RecoveryResult, RecoveryStatus, ResilienceService,
};
pub use predictor::{
    ErrorPredictor, MetricsSample, MetricsSource, PredictionResult, RiskFactor, RiskLevel,
};
