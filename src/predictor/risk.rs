//! Weighted risk scoring over a metrics sample

use crate::predictor::metrics::MetricsSample;
use serde::{Deserialize, Serialize};

/// Weights per metric. Fixed, sum to 1.0.
const WEIGHT_MEMORY: f64 = 0.30;
const WEIGHT_RESPONSE_TIME: f64 = 0.25;
const WEIGHT_ERROR_RATE: f64 = 0.20;
const WEIGHT_CONNECTIONS: f64 = 0.15;
const WEIGHT_CPU: f64 = 0.10;

/// Discrete risk level derived from the weighted score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score > 0.8 {
            Self::Critical
        } else if score > 0.6 {
            Self::High
        } else if score > 0.4 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// A single contributing factor with its normalized value and weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    /// Normalized severity of this factor, in [0, 1]
    pub value: f64,
    pub weight: f64,
    pub description: String,
}

/// Turns a metrics sample into a weighted risk score plus the factors that
/// contributed to it. Sub-scores use fixed thresholds; the final score is
/// clamped to [0, 1].
#[derive(Debug, Default, Clone, Copy)]
pub struct RiskScorer;

impl RiskScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score a sample. Returns the clamped score and all triggered factors.
    pub fn score(&self, sample: &MetricsSample) -> (f64, Vec<RiskFactor>) {
        let mut factors = Vec::new();

        let memory = Self::memory_factor(sample.memory_usage);
        if memory > 0.0 {
            factors.push(RiskFactor {
                name: "memory_usage".to_string(),
                value: memory,
                weight: WEIGHT_MEMORY,
                description: format!(
                    "Memory usage at {:.0}% of capacity",
                    sample.memory_usage * 100.0
                ),
            });
        }

        let response = Self::response_time_factor(sample.response_time_ms);
        if response > 0.0 {
            factors.push(RiskFactor {
                name: "response_time".to_string(),
                value: response,
                weight: WEIGHT_RESPONSE_TIME,
                description: format!("Responses averaging {:.0}ms", sample.response_time_ms),
            });
        }

        let errors = Self::error_rate_factor(sample.error_rate);
        if errors > 0.0 {
            factors.push(RiskFactor {
                name: "error_rate".to_string(),
                value: errors,
                weight: WEIGHT_ERROR_RATE,
                description: format!("Error rate at {:.1}%", sample.error_rate * 100.0),
            });
        }

        let connections = Self::connections_factor(sample.active_connections);
        if connections > 0.0 {
            factors.push(RiskFactor {
                name: "active_connections".to_string(),
                value: connections,
                weight: WEIGHT_CONNECTIONS,
                description: format!("{} active connections", sample.active_connections),
            });
        }

        let cpu = Self::cpu_factor(sample.cpu_usage);
        if cpu > 0.0 {
            factors.push(RiskFactor {
                name: "cpu_usage".to_string(),
                value: cpu,
                weight: WEIGHT_CPU,
                description: format!("CPU usage at {:.0}%", sample.cpu_usage * 100.0),
            });
        }

        let score: f64 = factors.iter().map(|f| f.value * f.weight).sum();
        (score.clamp(0.0, 1.0), factors)
    }

    /// Memory contributes above 70% usage, saturating at 95%.
    fn memory_factor(usage: f64) -> f64 {
        if usage <= 0.7 {
            0.0
        } else {
            ((usage - 0.7) / 0.25).clamp(0.0, 1.0)
        }
    }

    /// Response time contributes above 1s, saturating at 10s.
    fn response_time_factor(ms: f64) -> f64 {
        if ms <= 1000.0 {
            0.0
        } else {
            (ms / 10_000.0).clamp(0.0, 1.0)
        }
    }

    /// Error rate contributes above 1%, saturating at 10%.
    fn error_rate_factor(rate: f64) -> f64 {
        if rate <= 0.01 {
            0.0
        } else {
            (rate / 0.1).clamp(0.0, 1.0)
        }
    }

    /// Connections contribute above 100, saturating at 500.
    fn connections_factor(count: u32) -> f64 {
        if count <= 100 {
            0.0
        } else {
            (count as f64 / 500.0).clamp(0.0, 1.0)
        }
    }

    /// CPU contributes above 70% usage, saturating at 95%.
    fn cpu_factor(usage: f64) -> f64 {
        if usage <= 0.7 {
            0.0
        } else {
            ((usage - 0.7) / 0.25).clamp(0.0, 1.0)
        }
    }
}
