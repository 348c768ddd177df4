use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for the resilience core.
///
/// Every component keeps its own section; all fields carry defaults so a
/// partial TOML file (or none at all) is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub circuit: CircuitBreakerConfig,
    #[serde(default)]
    pub healing: HealingConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub predictor: PredictorConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl ResilienceConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse resilience config")
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds the circuit stays open before allowing a half-open probe
    #[serde(default = "default_circuit_timeout_secs")]
    pub timeout_secs: u64,
    /// Trial calls permitted while half-open
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            timeout_secs: default_circuit_timeout_secs(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

/// Self-healing engine tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealingConfig {
    /// Enable automatic healing
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Healing attempts per (category, component) before escalation
    #[serde(default = "default_max_healing_attempts")]
    pub max_healing_attempts: u32,
    /// Escalation events retained for inspection
    #[serde(default = "default_max_escalations")]
    pub max_escalations: usize,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_healing_attempts: default_max_healing_attempts(),
            max_escalations: default_max_escalations(),
        }
    }
}

/// Fallback chain tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Recent errors retained per strategy in the performance tracker
    #[serde(default = "default_error_ring")]
    pub error_ring_size: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            error_ring_size: default_error_ring(),
        }
    }
}

/// Error predictor tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// Background sampling interval (seconds)
    #[serde(default = "default_prediction_interval_secs")]
    pub interval_secs: u64,
    /// Past predictions retained for trend inspection
    #[serde(default = "default_max_predictions")]
    pub max_predictions: usize,
    /// Recurring metric signatures remembered (LRU-pruned beyond this)
    #[serde(default = "default_max_patterns")]
    pub max_patterns: usize,
}

impl PredictorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_prediction_interval_secs(),
            max_predictions: default_max_predictions(),
            max_patterns: default_max_patterns(),
        }
    }
}

/// Recovery orchestrator tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Concurrent recoveries admitted before rejecting outright
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_recoveries: usize,
    /// Overall pipeline timeout (seconds)
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    /// Retries of the original operation after fallback fails
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Base delay for retry backoff (ms)
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Multiplier applied per retry attempt
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Run the predictor and fire preventive actions before healing
    #[serde(default = "default_true")]
    pub enable_predictive: bool,
    /// Recovery attempts retained per key
    #[serde(default = "default_history_per_key")]
    pub history_per_key: usize,
    /// Recovery attempts retained globally
    #[serde(default = "default_history_global")]
    pub history_global: usize,
}

impl OrchestratorConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    /// Backoff delay for retry attempt `n` (1-based), before jitter.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let ms = self.retry_base_delay_ms as f64 * self.backoff_multiplier.powi(exp as i32);
        Duration::from_millis(ms as u64)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_recoveries: default_max_concurrent(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            enable_predictive: default_true(),
            history_per_key: default_history_per_key(),
            history_global: default_history_global(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_circuit_timeout_secs() -> u64 {
    60
}
fn default_half_open_max_calls() -> u32 {
    3
}
fn default_true() -> bool {
    true
}
fn default_max_healing_attempts() -> u32 {
    3
}
fn default_max_escalations() -> usize {
    50
}
fn default_error_ring() -> usize {
    5
}
fn default_prediction_interval_secs() -> u64 {
    30
}
fn default_max_predictions() -> usize {
    100
}
fn default_max_patterns() -> usize {
    100
}
fn default_max_concurrent() -> usize {
    5
}
fn default_recovery_timeout_secs() -> u64 {
    30
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_history_per_key() -> usize {
    10
}
fn default_history_global() -> usize {
    1000
}
