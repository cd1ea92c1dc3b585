use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{error, info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Failing; reject requests until the reopen timeout elapses.
    Open,
    /// Testing recovery with limited trial requests.
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Successes required to close again from half-open.
    pub success_threshold: u32,
    /// How long an open circuit waits before allowing a trial request.
    pub reopen_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reopen_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

/// Fault-isolation state machine for one provider.
///
/// All transitions happen under a single lock; concurrent requests reporting
/// on the same provider observe a consistent failure history.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            "circuit breaker '{}' initialized (failure_threshold={}, reopen_timeout={:?})",
            name, config.failure_threshold, config.reopen_timeout
        );
        Self {
            name,
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a call may be attempted right now. An open circuit whose
    /// reopen timeout has elapsed transitions to half-open and admits the call.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.reopen_timeout)
                    .unwrap_or(true);
                if elapsed {
                    info!("circuit breaker '{}' transitioning to half-open", self.name);
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    true
                } else {
                    warn!("circuit breaker '{}' is open, rejecting request", self.name);
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.success_count += 1;
            info!(
                "circuit breaker '{}' success in half-open ({}/{})",
                self.name, inner.success_count, self.config.success_threshold
            );
            if inner.success_count >= self.config.success_threshold {
                info!("circuit breaker '{}' recovered, closing", self.name);
                inner.state = CircuitState::Closed;
                inner.success_count = 0;
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::HalfOpen => {
                warn!(
                    "circuit breaker '{}' failed during trial, reopening",
                    self.name
                );
                inner.state = CircuitState::Open;
                inner.success_count = 0;
            }
            CircuitState::Closed => {
                warn!(
                    "circuit breaker '{}' failure ({}/{})",
                    self.name, inner.failure_count, self.config.failure_threshold
                );
                if inner.failure_count >= self.config.failure_threshold {
                    error!(
                        "circuit breaker '{}' threshold exceeded, opening for {:?}",
                        self.name, self.config.reopen_timeout
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Manually reset to closed; used by operational tooling.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        info!("circuit breaker '{}' manually reset to closed", self.name);
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure = None;
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().unwrap();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
        }
    }
}

/// Point-in-time view of one breaker, for monitoring endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
}

/// Process-wide registry so every request shares the same fault history per
/// provider.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect()
    }
}
