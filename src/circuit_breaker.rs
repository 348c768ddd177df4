//! Circuit breaker pattern for fault tolerance
//!
//! Three-state gate over a protected operation: closed (normal), open
//! (rejecting), half-open (limited probes after the cooldown). Trips on
//! consecutive failures; any half-open failure reopens immediately; a
//! half-open success closes and resets counters.

use crate::clock::SharedClock;
use crate::config::CircuitBreakerConfig;
use crate::errors::ResilienceError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failing, rejecting requests
    Open,
    /// Testing if the dependency recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    half_open_calls: u32,
    total_calls: u64,
    total_failures: u64,
    total_rejections: u64,
}

/// Circuit breaker owned by exactly one protected-operation category.
///
/// All transitions are synchronous and touch nothing but internal state;
/// time is read through the injected clock.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    inner: Mutex<Inner>,
}

/// Point-in-time breaker metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            name: name.to_string(),
            config,
            clock,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                half_open_calls: 0,
                total_calls: 0,
                total_failures: 0,
                total_rejections: 0,
            }),
        }
    }

    /// Current circuit state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Milliseconds until an open circuit permits a probe. Zero otherwise.
    pub fn remaining_wait_ms(&self) -> u64 {
        let inner = self.inner.lock();
        self.remaining_wait_ms_locked(&inner)
    }

    fn remaining_wait_ms_locked(&self, inner: &Inner) -> u64 {
        if inner.state != CircuitState::Open {
            return 0;
        }
        let Some(last) = inner.last_failure else {
            return 0;
        };
        let elapsed = self.clock.now().saturating_duration_since(last);
        self.config
            .timeout()
            .saturating_sub(elapsed)
            .as_millis() as u64
    }

    /// Admit or reject a call without executing anything.
    ///
    /// Open circuits whose cooldown has elapsed transition to half-open
    /// here; half-open circuits admit at most `half_open_max_calls` probes.
    pub fn try_acquire(&self) -> Result<(), ResilienceError> {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Open => {
                let wait = self.remaining_wait_ms_locked(&inner);
                if wait > 0 {
                    inner.total_rejections += 1;
                    warn!(breaker = %self.name, retry_after_ms = wait, "Circuit open, rejecting call");
                    return Err(ResilienceError::CircuitOpen {
                        retry_after_ms: wait,
                    });
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.half_open_calls = 1;
                inner.total_calls += 1;
                Ok(())
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls >= self.config.half_open_max_calls {
                    inner.total_rejections += 1;
                    let wait = self.config.timeout().as_millis() as u64;
                    warn!(breaker = %self.name, "Half-open probe limit reached, rejecting call");
                    return Err(ResilienceError::CircuitOpen {
                        retry_after_ms: wait,
                    });
                }
                inner.half_open_calls += 1;
                inner.total_calls += 1;
                Ok(())
            }
            CircuitState::Closed => {
                inner.total_calls += 1;
                Ok(())
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "Probe succeeded, closing circuit");
                self.transition(&mut inner, CircuitState::Closed);
            }
            _ => {
                inner.consecutive_failures = 0;
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        inner.consecutive_failures += 1;
        inner.last_failure = Some(self.clock.now());

        debug!(
            breaker = %self.name,
            consecutive_failures = inner.consecutive_failures,
            "Call failed"
        );

        match inner.state {
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "Probe failed, reopening circuit");
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Closed
                if inner.consecutive_failures >= self.config.failure_threshold =>
            {
                info!(
                    breaker = %self.name,
                    threshold = self.config.failure_threshold,
                    "Failure threshold reached, opening circuit"
                );
                self.transition(&mut inner, CircuitState::Open);
            }
            _ => {}
        }
    }

    /// Execute an operation through the breaker.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: Into<ResilienceError>,
    {
        self.try_acquire()?;

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e.into())
            }
        }
    }

    /// Operational override: reset to closed with zeroed counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Closed);
        inner.last_failure = None;
        inner.total_calls = 0;
        inner.total_failures = 0;
        inner.total_rejections = 0;
    }

    /// Operational override: open immediately, as if a failure just happened.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(self.clock.now());
        self.transition(&mut inner, CircuitState::Open);
    }

    /// Operational override: close immediately.
    pub fn force_close(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Closed);
    }

    fn transition(&self, inner: &mut Inner, new_state: CircuitState) {
        let old_state = inner.state;
        inner.state = new_state;
        inner.consecutive_failures = 0;
        inner.half_open_calls = 0;

        if old_state != new_state {
            info!(
                breaker = %self.name,
                old_state = %old_state,
                new_state = %new_state,
                "Circuit breaker state changed"
            );
        }
    }

    /// Point-in-time metrics.
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
