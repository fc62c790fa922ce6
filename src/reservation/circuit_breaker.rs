//! Closed/open/half-open guard wrapping every reservation-store call.

use crate::metrics::MetricsCollector;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    last_failure_unix: AtomicU64,
    failure_threshold: u32,
    recovery_timeout: Duration,
    half_open_max_calls: u32,
    half_open_calls: AtomicU32,
    metrics: Option<Arc<MetricsCollector>>,
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout_seconds: u64, half_open_max_calls: u32) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            last_failure_unix: AtomicU64::new(0),
            failure_threshold,
            recovery_timeout: Duration::from_secs(recovery_timeout_seconds),
            half_open_max_calls,
            half_open_calls: AtomicU32::new(0),
            metrics: None,
        }
    }

    /// Wires the `circuit_breaker_open_count` counter to the closed->open
    /// transition. Builder-style so `new`'s call sites that don't care about
    /// metrics (tests) don't have to pass one.
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Checks whether a call may proceed, transitioning open -> half-open
    /// when the recovery timeout has elapsed.
    pub fn can_execute(&self) -> bool {
        let state = *self.state.read().unwrap();
        match state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = now_unix().saturating_sub(self.last_failure_unix.load(Ordering::Relaxed));
                if elapsed >= self.recovery_timeout.as_secs() {
                    let mut state = self.state.write().unwrap();
                    if *state == CircuitState::Open {
                        *state = CircuitState::HalfOpen;
                        self.half_open_calls.store(0, Ordering::Relaxed);
                        info!("circuit breaker transitioning to half-open");
                    }
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                self.half_open_calls.fetch_add(1, Ordering::Relaxed) < self.half_open_max_calls
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.write().unwrap();
        match *state {
            CircuitState::HalfOpen => {
                *state = CircuitState::Closed;
                self.failure_count.store(0, Ordering::Relaxed);
                info!("circuit breaker recovered, transitioning to closed");
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_failure_unix.store(now_unix(), Ordering::Relaxed);

        let mut state = self.state.write().unwrap();
        match *state {
            CircuitState::Closed => {
                if failures >= self.failure_threshold {
                    *state = CircuitState::Open;
                    error!(failures, threshold = self.failure_threshold, "circuit breaker opened");
                    if let Some(metrics) = self.metrics.clone() {
                        tokio::spawn(async move { metrics.record_circuit_breaker_open().await });
                    }
                }
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                warn!("circuit breaker probe failed, returning to open");
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(3, 60, 1);
        assert!(cb.can_execute());
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn half_open_success_closes_and_resets() {
        let cb = CircuitBreaker::new(1, 0, 2);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.can_execute()); // recovery timeout is 0, transitions to half-open
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new(1, 0, 2);
        cb.record_failure();
        assert!(cb.can_execute());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
