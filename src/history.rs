//! Append-only recovery attempt history
//!
//! Bounded two ways: per recovery key (oldest evicted past 10) and globally
//! (oldest evicted past 1000). Records are immutable once appended.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// One recorded recovery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub id: Uuid,
    pub key: String,
    pub error_type: String,
    pub strategy_used: String,
    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

pub struct RecoveryHistory {
    per_key_limit: usize,
    global_limit: usize,
    /// Insertion-ordered record ids; oldest first
    order: RwLock<VecDeque<Uuid>>,
    by_key: RwLock<HashMap<String, VecDeque<RecoveryAttempt>>>,
}

impl RecoveryHistory {
    pub fn new(per_key_limit: usize, global_limit: usize) -> Self {
        Self {
            per_key_limit,
            global_limit,
            order: RwLock::new(VecDeque::new()),
            by_key: RwLock::new(HashMap::new()),
        }
    }

    /// Append an attempt, evicting the oldest entries past either bound.
    pub fn record(
        &self,
        key: &str,
        error_type: &str,
        strategy_used: &str,
        success: bool,
        duration_ms: u64,
    ) -> Uuid {
        let attempt = RecoveryAttempt {
            id: Uuid::new_v4(),
            key: key.to_string(),
            error_type: error_type.to_string(),
            strategy_used: strategy_used.to_string(),
            success,
            duration_ms,
            timestamp: Utc::now(),
        };
        let id = attempt.id;

        let mut by_key = self.by_key.write();
        let mut order = self.order.write();

        let bucket = by_key.entry(key.to_string()).or_default();
        bucket.push_back(attempt);
        if bucket.len() > self.per_key_limit {
            if let Some(evicted) = bucket.pop_front() {
                order.retain(|oid| *oid != evicted.id);
            }
        }

        order.push_back(id);
        while order.len() > self.global_limit {
            let Some(oldest) = order.pop_front() else {
                break;
            };
            for bucket in by_key.values_mut() {
                bucket.retain(|a| a.id != oldest);
            }
        }
        by_key.retain(|_, bucket| !bucket.is_empty());

        id
    }

    /// Attempts for one key, oldest first.
    pub fn for_key(&self, key: &str) -> Vec<RecoveryAttempt> {
        self.by_key
            .read()
            .get(key)
            .map(|bucket| bucket.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All attempts, oldest first.
    pub fn all(&self) -> Vec<RecoveryAttempt> {
        let by_key = self.by_key.read();
        let order = self.order.read();
        let index: HashMap<Uuid, &RecoveryAttempt> = by_key
            .values()
            .flat_map(|bucket| bucket.iter())
            .map(|a| (a.id, a))
            .collect();
        order
            .iter()
            .filter_map(|id| index.get(id).map(|a| (*a).clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.order.write().clear();
        self.by_key.write().clear();
    }
}

impl Default for RecoveryHistory {
    fn default() -> Self {
        Self::new(10, 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_fetch() {
        let history = RecoveryHistory::default();
        history.record("k1", "api_timeout", "fallback", true, 120);

        let attempts = history.for_key("k1");
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].strategy_used, "fallback");
        assert!(attempts[0].success);
    }

    #[test]
    fn test_per_key_bound_evicts_oldest() {
        let history = RecoveryHistory::new(3, 100);
        for i in 0..5 {
            history.record("k", "e", &format!("s{i}"), true, 0);
        }
        let attempts = history.for_key("k");
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0].strategy_used, "s2");
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_global_bound_evicts_oldest_across_keys() {
        let history = RecoveryHistory::new(10, 4);
        for i in 0..6 {
            history.record(&format!("k{i}"), "e", "s", false, 0);
        }
        assert_eq!(history.len(), 4);
        assert!(history.for_key("k0").is_empty());
        assert!(history.for_key("k1").is_empty());
        assert_eq!(history.for_key("k5").len(), 1);
    }

    #[test]
    fn test_all_preserves_insertion_order() {
        let history = RecoveryHistory::default();
        history.record("a", "e", "s1", true, 0);
        history.record("b", "e", "s2", false, 0);
        history.record("a", "e", "s3", true, 0);

        let all = history.all();
        let strategies: Vec<_> = all.iter().map(|a| a.strategy_used.as_str()).collect();
        assert_eq!(strategies, vec!["s1", "s2", "s3"]);
    }

    #[test]
    fn test_clear_empties_everything() {
        let history = RecoveryHistory::default();
        history.record("k", "e", "s", true, 0);
        history.clear();
        assert!(history.is_empty());
        assert!(history.for_key("k").is_empty());
    }
}
