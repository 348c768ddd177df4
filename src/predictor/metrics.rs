//! Metrics source abstraction polled by the error predictor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One sample of system health metrics.
///
/// `memory_usage`, `cpu_usage`, and `error_rate` are normalized to [0, 1];
/// `active_connections` is a raw count and `response_time_ms` a raw latency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    pub memory_usage: f64,
    pub cpu_usage: f64,
    pub active_connections: u32,
    pub error_rate: f64,
    pub response_time_ms: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricsSample {
    pub fn new(
        memory_usage: f64,
        cpu_usage: f64,
        active_connections: u32,
        error_rate: f64,
        response_time_ms: f64,
    ) -> Self {
        Self {
            memory_usage,
            cpu_usage,
            active_connections,
            error_rate,
            response_time_ms,
            timestamp: Utc::now(),
        }
    }

    /// Rounded bucket signature used for recurring-pattern memory.
    ///
    /// Buckets: usage ratios to one decimal, connections to tens,
    /// response time to half-seconds.
    pub fn signature(&self) -> String {
        format!(
            "m{:.1}:c{:.1}:n{}:e{:.1}:r{}",
            (self.memory_usage * 10.0).round() / 10.0,
            (self.cpu_usage * 10.0).round() / 10.0,
            (self.active_connections / 10) * 10,
            (self.error_rate * 10.0).round() / 10.0,
            ((self.response_time_ms / 500.0).round() * 500.0) as u64,
        )
    }
}

impl Default for MetricsSample {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0, 0.0, 0.0)
    }
}

/// Source of health metrics, supplied by the embedding application.
#[async_trait::async_trait]
pub trait MetricsSource: Send + Sync {
    async fn collect(&self) -> anyhow::Result<MetricsSample>;
}

/// Fixed-sample source for tests and wiring checks.
pub struct StaticMetricsSource {
    sample: parking_lot::Mutex<MetricsSample>,
}

impl StaticMetricsSource {
    pub fn new(sample: MetricsSample) -> Self {
        Self {
            sample: parking_lot::Mutex::new(sample),
        }
    }

    pub fn set(&self, sample: MetricsSample) {
        *self.sample.lock() = sample;
    }
}

#[async_trait::async_trait]
impl MetricsSource for StaticMetricsSource {
    async fn collect(&self) -> anyhow::Result<MetricsSample> {
        Ok(self.sample.lock().clone())
    }
}
