//! Per-strategy performance bookkeeping for the fallback chain

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

#[derive(Debug, Default)]
struct StrategyStats {
    successes: u64,
    failures: u64,
    total_duration: Duration,
    recent_errors: VecDeque<String>,
}

/// Serializable per-strategy summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyPerformance {
    pub strategy: String,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub recent_errors: Vec<String>,
}

/// Tracks success/failure counts, average duration, and a short ring of
/// recent error messages per fallback strategy.
pub struct PerformanceTracker {
    error_ring_size: usize,
    stats: RwLock<HashMap<String, StrategyStats>>,
}

impl PerformanceTracker {
    pub fn new(error_ring_size: usize) -> Self {
        Self {
            error_ring_size,
            stats: RwLock::new(HashMap::new()),
        }
    }

    pub fn record_success(&self, strategy: &str, duration: Duration) {
        let mut stats = self.stats.write();
        let entry = stats.entry(strategy.to_string()).or_default();
        entry.successes += 1;
        entry.total_duration += duration;
    }

    pub fn record_failure(&self, strategy: &str, duration: Duration, error: &str) {
        let mut stats = self.stats.write();
        let entry = stats.entry(strategy.to_string()).or_default();
        entry.failures += 1;
        entry.total_duration += duration;
        entry.recent_errors.push_back(error.to_string());
        while entry.recent_errors.len() > self.error_ring_size {
            entry.recent_errors.pop_front();
        }
    }

    pub fn performance(&self, strategy: &str) -> Option<StrategyPerformance> {
        let stats = self.stats.read();
        stats.get(strategy).map(|s| Self::to_performance(strategy, s))
    }

    pub fn all(&self) -> Vec<StrategyPerformance> {
        let stats = self.stats.read();
        let mut out: Vec<_> = stats
            .iter()
            .map(|(name, s)| Self::to_performance(name, s))
            .collect();
        out.sort_by(|a, b| a.strategy.cmp(&b.strategy));
        out
    }

    pub fn reset(&self) {
        self.stats.write().clear();
    }

    fn to_performance(name: &str, s: &StrategyStats) -> StrategyPerformance {
        let total = s.successes + s.failures;
        StrategyPerformance {
            strategy: name.to_string(),
            successes: s.successes,
            failures: s.failures,
            success_rate: if total > 0 {
                s.successes as f64 / total as f64
            } else {
                0.0
            },
            avg_duration_ms: if total > 0 {
                s.total_duration.as_millis() as f64 / total as f64
            } else {
                0.0
            },
            recent_errors: s.recent_errors.iter().cloned().collect(),
        }
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_strategy_is_none() {
        let tracker = PerformanceTracker::default();
        assert!(tracker.performance("nope").is_none());
    }

    #[test]
    fn test_success_rate_recomputes_from_counters() {
        let tracker = PerformanceTracker::default();
        tracker.record_success("cached", Duration::from_millis(10));
        tracker.record_success("cached", Duration::from_millis(20));
        tracker.record_failure("cached", Duration::from_millis(30), "miss");

        let perf = tracker.performance("cached").unwrap();
        assert_eq!(perf.successes, 2);
        assert_eq!(perf.failures, 1);
        assert!((perf.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((perf.avg_duration_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_ring_keeps_last_five() {
        let tracker = PerformanceTracker::default();
        for i in 0..8 {
            tracker.record_failure("s", Duration::ZERO, &format!("err-{i}"));
        }
        let perf = tracker.performance("s").unwrap();
        assert_eq!(perf.recent_errors.len(), 5);
        assert_eq!(perf.recent_errors[0], "err-3");
        assert_eq!(perf.recent_errors[4], "err-7");
    }

    #[test]
    fn test_all_is_sorted_by_name() {
        let tracker = PerformanceTracker::default();
        tracker.record_success("zeta", Duration::ZERO);
        tracker.record_success("alpha", Duration::ZERO);
        let all = tracker.all();
        assert_eq!(all[0].strategy, "alpha");
        assert_eq!(all[1].strategy, "zeta");
    }

    #[test]
    fn test_reset_clears_stats() {
        let tracker = PerformanceTracker::default();
        tracker.record_success("s", Duration::ZERO);
        tracker.reset();
        assert!(tracker.all().is_empty());
    }
}
