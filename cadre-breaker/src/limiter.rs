//! Token-bucket rate limiter for outbound effectors (SPEC_FULL.md §4.2).

use cadre_core::time::{Clock, SystemClock, WallClockMs};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::BreakerError;

/// Canonical outbound rate limits (§4.2, §6.4).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

impl RateLimitConfig {
    pub const CHAT: RateLimitConfig = RateLimitConfig {
        capacity: 1.0,
        refill_per_sec: 1.0,
    };
    pub const PAGER: RateLimitConfig = RateLimitConfig {
        capacity: 2.0,
        refill_per_sec: 2.0 / 60.0,
    };
    pub const EMAIL: RateLimitConfig = RateLimitConfig {
        capacity: 10.0,
        refill_per_sec: 10.0,
    };
}

struct BucketState {
    tokens: f64,
    last_refill: WallClockMs,
}

/// A token bucket for one outbound destination.
pub struct RateLimiter {
    destination: String,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(destination: impl Into<String>, config: RateLimitConfig) -> Self {
        Self::with_clock(destination, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        destination: impl Into<String>,
        config: RateLimitConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now_ms();
        Self {
            destination: destination.into(),
            config,
            clock,
            state: Mutex::new(BucketState {
                tokens: config.capacity,
                last_refill: now,
            }),
        }
    }

    /// Attempts to obtain a token without blocking, refilling the bucket
    /// based on elapsed time first.
    pub async fn try_acquire(&self) -> Result<(), BreakerError> {
        let mut state = self.state.lock().await;
        let now_ms = self.clock.now_ms().as_millis();
        let elapsed_ms = now_ms.saturating_sub(state.last_refill.as_millis()) as f64;
        let refill = elapsed_ms / 1000.0 * self.config.refill_per_sec;
        state.tokens = (state.tokens + refill).min(self.config.capacity);
        state.last_refill = WallClockMs::from_millis(now_ms);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            Err(BreakerError::RateLimited {
                destination: self.destination.clone(),
            })
        }
    }

    /// Polls for a token until `timeout` elapses; callers that time out
    /// observe `RateLimited` and may choose to degrade (§4.2).
    pub async fn acquire_within(&self, timeout: Duration) -> Result<(), BreakerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.try_acquire().await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BreakerError::RateLimited {
                    destination: self.destination.clone(),
                });
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadre_core::time::{DurationMs, FixedClock};

    #[tokio::test]
    async fn allows_burst_up_to_capacity_then_limits() {
        let clock = Arc::new(FixedClock::at(0));
        let limiter = RateLimiter::with_clock("email", RateLimitConfig::EMAIL, clock);
        for _ in 0..10 {
            limiter.try_acquire().await.unwrap();
        }
        assert!(limiter.try_acquire().await.is_err());
    }

    #[tokio::test]
    async fn refills_over_time() {
        let clock = Arc::new(FixedClock::at(0));
        let limiter = RateLimiter::with_clock("chat", RateLimitConfig::CHAT, clock.clone());
        limiter.try_acquire().await.unwrap();
        assert!(limiter.try_acquire().await.is_err());
        clock.advance(DurationMs::from_secs(1));
        limiter.try_acquire().await.unwrap();
    }
}
