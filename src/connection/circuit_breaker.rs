//! # Circuit Breaker
//!
//! Guards connection attempts against a persistently failing endpoint.
//!
//! Closed → `failure_threshold` consecutive failures → Open (attempts
//! rejected until the cool-down elapses) → HalfOpen (attempts allowed)
//! → `success_threshold` consecutive successes → Closed. Any failure
//! while HalfOpen reopens the circuit with a fresh cool-down.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::CircuitBreakerConfig;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation; attempts allowed
    Closed,
    /// Attempts rejected until the cool-down elapses
    Open,
    /// Probing recovery; attempts allowed
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    next_attempt_time: Option<DateTime<Utc>>,
}

/// Point-in-time view of the breaker, for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_attempt_time: Option<DateTime<Utc>>,
}

/// Consecutive-failure circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
                next_attempt_time: None,
            }),
        }
    }

    /// Whether a new attempt may proceed. An open circuit whose
    /// cool-down has elapsed transitions to half-open here.
    pub fn allow_attempt(&self) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let due = inner
                    .next_attempt_time
                    .map(|t| Utc::now() >= t)
                    .unwrap_or(true);
                if due {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful attempt.
    pub fn record_success(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.next_attempt_time = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed attempt.
    pub fn record_failure(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };

        inner.failure_count += 1;
        inner.success_count = 0;
        inner.last_failure_time = Some(Utc::now());

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failure_count >= self.config.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            inner.state = CircuitState::Open;
            inner.next_attempt_time = Some(Utc::now() + cooldown_duration(&self.config));
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner
            .lock()
            .map(|inner| inner.state)
            .unwrap_or(CircuitState::Open)
    }

    /// When the next attempt is allowed, if the circuit is open.
    pub fn next_attempt_time(&self) -> Option<DateTime<Utc>> {
        self.inner
            .lock()
            .map(|inner| inner.next_attempt_time)
            .unwrap_or(None)
    }

    /// Full snapshot for observability.
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        match self.inner.lock() {
            Ok(inner) => CircuitBreakerSnapshot {
                state: inner.state,
                failure_count: inner.failure_count,
                success_count: inner.success_count,
                last_failure_time: inner.last_failure_time,
                next_attempt_time: inner.next_attempt_time,
            },
            Err(_) => CircuitBreakerSnapshot {
                state: CircuitState::Open,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
                next_attempt_time: None,
            },
        }
    }
}

fn cooldown_duration(config: &CircuitBreakerConfig) -> Duration {
    Duration::milliseconds(config.cooldown.as_millis().min(i64::MAX as u128) as i64)
}
