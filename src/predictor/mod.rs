//! Error prediction from system metrics
//!
//! Polls a caller-supplied metrics source, scores the sample for risk, maps
//! triggered factors to candidate error types and preventive actions, and
//! remembers recurring metric signatures as patterns. Can run on demand or
//! on a fixed background interval.

pub mod metrics;
pub mod risk;

use crate::config::PredictorConfig;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub use metrics::{MetricsSample, MetricsSource, StaticMetricsSource};
pub use risk::{RiskFactor, RiskLevel, RiskScorer};

/// A single prediction over one metrics sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub factors: Vec<RiskFactor>,
    pub predicted_error_types: Vec<String>,
    pub preventive_actions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// A recurring metric signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternEntry {
    pub signature: String,
    pub occurrences: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Serializable predictor summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorSummary {
    pub predictions_made: u64,
    pub collection_failures: u64,
    pub retained_predictions: usize,
    pub known_patterns: usize,
    pub last_risk_level: Option<RiskLevel>,
}

pub struct ErrorPredictor {
    config: PredictorConfig,
    source: Arc<dyn MetricsSource>,
    scorer: RiskScorer,
    predictions: RwLock<VecDeque<PredictionResult>>,
    patterns: Mutex<LruCache<String, PatternEntry>>,
    predictions_made: AtomicU64,
    collection_failures: AtomicU64,
    shutdown: Mutex<Option<tokio::sync::watch::Sender<bool>>>,
}

impl ErrorPredictor {
    pub fn new(config: PredictorConfig, source: Arc<dyn MetricsSource>) -> Self {
        let cap = NonZeroUsize::new(config.max_patterns.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            source,
            scorer: RiskScorer::new(),
            predictions: RwLock::new(VecDeque::new()),
            patterns: Mutex::new(LruCache::new(cap)),
            predictions_made: AtomicU64::new(0),
            collection_failures: AtomicU64::new(0),
            shutdown: Mutex::new(None),
        }
    }

    /// Collect a fresh sample, score it, and record the prediction.
    pub async fn analyze(&self) -> anyhow::Result<PredictionResult> {
        let sample = match self.source.collect().await {
            Ok(sample) => sample,
            Err(e) => {
                self.collection_failures.fetch_add(1, Ordering::Relaxed);
                return Err(e.context("metrics collection failed"));
            }
        };
        Ok(self.analyze_sample(&sample))
    }

    /// Score an already-collected sample.
    pub fn analyze_sample(&self, sample: &MetricsSample) -> PredictionResult {
        let (risk_score, factors) = self.scorer.score(sample);
        let risk_level = RiskLevel::from_score(risk_score);

        let predicted_error_types = Self::predicted_error_types(&factors);
        let preventive_actions = Self::preventive_actions(&factors);

        let result = PredictionResult {
            risk_score,
            risk_level,
            factors,
            predicted_error_types,
            preventive_actions,
            timestamp: Utc::now(),
        };

        self.predictions_made.fetch_add(1, Ordering::Relaxed);
        self.remember_pattern(sample);

        {
            let mut predictions = self.predictions.write();
            predictions.push_back(result.clone());
            while predictions.len() > self.config.max_predictions {
                predictions.pop_front();
            }
        }

        debug!(
            risk_score = result.risk_score,
            risk_level = ?result.risk_level,
            factors = result.factors.len(),
            "Prediction recorded"
        );
        result
    }

    fn predicted_error_types(factors: &[RiskFactor]) -> Vec<String> {
        let mut types = Vec::new();
        for factor in factors {
            // Only factors past half severity suggest concrete error types
            if factor.value < 0.5 {
                continue;
            }
            match factor.name.as_str() {
                "memory_usage" => {
                    types.push("OUT_OF_MEMORY".to_string());
                    types.push("ALLOCATION_FAILURE".to_string());
                }
                "response_time" => {
                    types.push("API_TIMEOUT".to_string());
                    types.push("CASCADING_SLOWDOWN".to_string());
                }
                "error_rate" => {
                    types.push("SERVICE_DEGRADATION".to_string());
                    types.push("UPSTREAM_FAILURE".to_string());
                }
                "active_connections" => {
                    types.push("CONNECTION_POOL_EXHAUSTION".to_string());
                    types.push("WEBSOCKET_DROP".to_string());
                }
                "cpu_usage" => {
                    types.push("THREAD_STARVATION".to_string());
                }
                _ => {}
            }
        }
        types
    }

    fn preventive_actions(factors: &[RiskFactor]) -> Vec<String> {
        let mut actions = Vec::new();
        for factor in factors {
            if factor.value < 0.5 {
                continue;
            }
            match factor.name.as_str() {
                "memory_usage" => {
                    actions.push("Clear caches and release unused buffers".to_string());
                }
                "response_time" => {
                    actions.push("Throttle incoming requests".to_string());
                }
                "error_rate" => {
                    actions.push("Shed low-priority load".to_string());
                }
                "active_connections" => {
                    actions.push("Recycle idle connections".to_string());
                }
                "cpu_usage" => {
                    actions.push("Scale out workers".to_string());
                }
                _ => {}
            }
        }
        actions
    }

    fn remember_pattern(&self, sample: &MetricsSample) {
        let signature = sample.signature();
        let now = Utc::now();
        let mut patterns = self.patterns.lock();
        if let Some(entry) = patterns.get_mut(&signature) {
            entry.occurrences += 1;
            entry.last_seen = now;
        } else {
            // At capacity the least-recently-seen signature is evicted
            patterns.put(
                signature.clone(),
                PatternEntry {
                    signature,
                    occurrences: 1,
                    first_seen: now,
                    last_seen: now,
                },
            );
        }
    }

    /// Spawn the background sampling loop. A second call replaces the
    /// previous loop.
    pub fn start(self: &Arc<Self>) {
        let (tx, mut rx) = tokio::sync::watch::channel(false);
        *self.shutdown.lock() = Some(tx);

        let predictor = Arc::clone(self);
        let interval = self.config.interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = predictor.analyze().await {
                            warn!(error = %e, "Background prediction pass failed");
                        }
                    }
                    _ = rx.changed() => {
                        debug!("Error predictor loop stopping");
                        break;
                    }
                }
            }
        });
    }

    /// Stop the background loop, if running.
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
    }

    /// Most recent prediction, if any.
    pub fn latest(&self) -> Option<PredictionResult> {
        self.predictions.read().back().cloned()
    }

    /// Retained predictions, oldest first.
    pub fn history(&self) -> Vec<PredictionResult> {
        self.predictions.read().iter().cloned().collect()
    }

    /// Known recurring patterns, most recently seen first.
    pub fn patterns(&self) -> Vec<PatternEntry> {
        self.patterns
            .lock()
            .iter()
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    pub fn summary(&self) -> PredictorSummary {
        // Take the ring lock once; a second read on the same RwLock can
        // block behind a writer queued between the two acquisitions.
        let (retained_predictions, last_risk_level) = {
            let predictions = self.predictions.read();
            (predictions.len(), predictions.back().map(|p| p.risk_level))
        };
        PredictorSummary {
            predictions_made: self.predictions_made.load(Ordering::Relaxed),
            collection_failures: self.collection_failures.load(Ordering::Relaxed),
            retained_predictions,
            known_patterns: self.patterns.lock().len(),
            last_risk_level,
        }
    }

    /// Clear predictions, patterns, and counters.
    pub fn reset(&self) {
        self.predictions.write().clear();
        self.patterns.lock().clear();
        self.predictions_made.store(0, Ordering::Relaxed);
        self.collection_failures.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn predictor_with(sample: MetricsSample) -> (Arc<ErrorPredictor>, Arc<StaticMetricsSource>) {
        let source = Arc::new(StaticMetricsSource::new(sample));
        let predictor = Arc::new(ErrorPredictor::new(
            PredictorConfig::default(),
            source.clone(),
        ));
        (predictor, source)
    }

    #[tokio::test]
    async fn test_analyze_scores_and_records() {
        let (predictor, _) = predictor_with(MetricsSample::new(0.95, 0.0, 0, 0.0, 0.0));
        let result = predictor.analyze().await.unwrap();
        assert_eq!(result.risk_level, RiskLevel::Low);
        assert_eq!(predictor.history().len(), 1);
        assert_eq!(predictor.summary().predictions_made, 1);
    }

    #[tokio::test]
    async fn test_high_memory_predicts_oom() {
        let (predictor, _) = predictor_with(MetricsSample::new(0.95, 0.0, 0, 0.0, 0.0));
        let result = predictor.analyze().await.unwrap();
        assert!(result
            .predicted_error_types
            .contains(&"OUT_OF_MEMORY".to_string()));
        assert!(result
            .preventive_actions
            .iter()
            .any(|a| a.contains("caches")));
    }

    #[tokio::test]
    async fn test_mild_factors_predict_nothing() {
        // memory 0.75 gives a factor of 0.2, under the 0.5 reporting bar
        let (predictor, _) = predictor_with(MetricsSample::new(0.75, 0.0, 0, 0.0, 0.0));
        let result = predictor.analyze().await.unwrap();
        assert!(result.predicted_error_types.is_empty());
        assert!(result.preventive_actions.is_empty());
    }

    #[tokio::test]
    async fn test_prediction_ring_bounded() {
        let source = Arc::new(StaticMetricsSource::new(MetricsSample::default()));
        let config = PredictorConfig {
            max_predictions: 5,
            ..Default::default()
        };
        let predictor = ErrorPredictor::new(config, source);
        for _ in 0..8 {
            predictor.analyze().await.unwrap();
        }
        assert_eq!(predictor.history().len(), 5);
        assert_eq!(predictor.summary().predictions_made, 8);
    }

    #[test]
    fn test_summary_concurrent_with_analysis_completes() {
        let (predictor, _) = predictor_with(MetricsSample::default());
        let writer = {
            let predictor = predictor.clone();
            std::thread::spawn(move || {
                let sample = MetricsSample::new(0.9, 0.2, 120, 0.02, 1800.0);
                for _ in 0..2_000 {
                    predictor.analyze_sample(&sample);
                }
            })
        };
        let reader = {
            let predictor = predictor.clone();
            std::thread::spawn(move || {
                for _ in 0..2_000 {
                    let _ = predictor.summary();
                }
            })
        };

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            writer.join().unwrap();
            reader.join().unwrap();
            done_tx.send(()).unwrap();
        });
        assert!(
            done_rx
                .recv_timeout(std::time::Duration::from_secs(10))
                .is_ok(),
            "summary must not block behind a queued ring writer"
        );
        assert_eq!(predictor.summary().predictions_made, 2_000);
    }

    #[tokio::test]
    async fn test_recurring_signature_counts_occurrences() {
        let (predictor, _) = predictor_with(MetricsSample::new(0.9, 0.1, 50, 0.0, 2000.0));
        for _ in 0..3 {
            predictor.analyze().await.unwrap();
        }
        let patterns = predictor.patterns();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].occurrences, 3);
    }

    #[tokio::test]
    async fn test_pattern_cap_prunes_least_recent() {
        let source = Arc::new(StaticMetricsSource::new(MetricsSample::default()));
        let config = PredictorConfig {
            max_patterns: 2,
            ..Default::default()
        };
        let predictor = ErrorPredictor::new(config, source.clone());

        for memory in [0.0, 0.2, 0.4] {
            source.set(MetricsSample::new(memory, 0.0, 0, 0.0, 0.0));
            predictor.analyze().await.unwrap();
        }
        assert_eq!(predictor.patterns().len(), 2);
    }

    #[tokio::test]
    async fn test_collection_failure_is_counted() {
        struct Broken;
        #[async_trait::async_trait]
        impl MetricsSource for Broken {
            async fn collect(&self) -> anyhow::Result<MetricsSample> {
                anyhow::bail!("sensor offline")
            }
        }

        let predictor = ErrorPredictor::new(PredictorConfig::default(), Arc::new(Broken));
        assert!(predictor.analyze().await.is_err());
        assert_eq!(predictor.summary().collection_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loop_samples_on_interval() {
        let (predictor, _) = predictor_with(MetricsSample::default());
        predictor.start();

        // 3 interval ticks (the first tick fires immediately)
        tokio::time::sleep(std::time::Duration::from_secs(61)).await;
        predictor.stop();

        assert!(predictor.summary().predictions_made >= 3);
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let (predictor, _) = predictor_with(MetricsSample::new(0.95, 0.0, 0, 0.0, 0.0));
        predictor.analyze().await.unwrap();
        predictor.reset();

        let summary = predictor.summary();
        assert_eq!(summary.predictions_made, 0);
        assert_eq!(summary.retained_predictions, 0);
        assert_eq!(summary.known_patterns, 0);
        assert!(predictor.latest().is_none());
    }
}
