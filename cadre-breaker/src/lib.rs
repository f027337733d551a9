//! Circuit breaker and rate limiter (C5): per-destination failure isolation
//! and outbound pacing (SPEC_FULL.md §4.2).
//!
//! Grounded conceptually on `layer0::operator::ExitReason`'s
//! `CircuitBreaker`/`Timeout` variants and on the "first-class component
//! wrapping a call site" shape SPEC_FULL.md §9 calls for in place of
//! decorator middleware. The state machine and token bucket themselves are
//! new: no crate in the retrieval pack implements one.

pub mod limiter;

use cadre_core::breaker::{CircuitBreakerState, CircuitState};
use cadre_core::time::{Clock, DurationMs, SystemClock};
pub use cadre_core::error::BreakerError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Configuration for one breaker instance (§4.2, §6.4 defaults).
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub half_open_success_threshold: u32,
    pub call_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            half_open_success_threshold: 2,
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// A circuit breaker guarding calls to one destination (agent kind,
/// provider, or outbound channel).
pub struct CircuitBreaker {
    destination: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<CircuitBreakerState>,
}

impl CircuitBreaker {
    pub fn new(destination: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_clock(destination, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        destination: impl Into<String>,
        config: BreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let destination = destination.into();
        Self {
            state: Mutex::new(CircuitBreakerState::closed(destination.clone())),
            destination,
            config,
            clock,
        }
    }

    pub async fn snapshot(&self) -> CircuitBreakerState {
        self.state.lock().await.clone()
    }

    /// Wraps a fallible async call with the breaker's timeout and state
    /// transitions. Times out after `config.call_timeout`; a timeout counts
    /// as a failure exactly like a returned error (§4.2).
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.admit().await?;

        let outcome = tokio::time::timeout(self.config.call_timeout, f()).await;
        match outcome {
            Ok(Ok(value)) => {
                self.on_success().await;
                Ok(value)
            }
            Ok(Err(err)) => {
                self.on_failure().await;
                Err(BreakerError::Other(err.into()))
            }
            Err(_elapsed) => {
                self.on_failure().await;
                Err(BreakerError::CircuitOpen {
                    destination: self.destination.clone(),
                })
            }
        }
    }

    async fn admit(&self) -> Result<(), BreakerError> {
        let mut state = self.state.lock().await;
        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = state
                    .opened_at
                    .map(|opened| self.clock.now_ms().saturating_sub(opened))
                    .unwrap_or(DurationMs::from_millis(0));
                if elapsed.as_millis() >= self.config.cooldown.as_millis() as u64 {
                    state.state = CircuitState::HalfOpen;
                    state.consecutive_successes = 0;
                    tracing::debug!(destination = %self.destination, "breaker cooldown elapsed, half-open");
                    Ok(())
                } else {
                    Err(BreakerError::CircuitOpen {
                        destination: self.destination.clone(),
                    })
                }
            }
            _ => unreachable!(),
        }
    }

    async fn on_success(&self) {
        let mut state = self.state.lock().await;
        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.config.half_open_success_threshold {
                    state.state = CircuitState::Closed;
                    state.consecutive_failures = 0;
                    state.consecutive_successes = 0;
                    tracing::info!(destination = %self.destination, "breaker closed");
                }
            }
            CircuitState::Open => {}
            _ => unreachable!(),
        }
    }

    async fn on_failure(&self) {
        let mut state = self.state.lock().await;
        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    state.opened_at = Some(self.clock.now_ms());
                    tracing::warn!(destination = %self.destination, "breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.opened_at = Some(self.clock.now_ms());
                state.consecutive_successes = 0;
                tracing::warn!(destination = %self.destination, "breaker reopened after half-open failure");
            }
            CircuitState::Open => {}
            _ => unreachable!(),
        }
    }
}
