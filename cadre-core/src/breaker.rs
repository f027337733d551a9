//! Circuit breaker state data model (SPEC_FULL.md §3, §4.2). The state
//! machine transitions themselves live in `cadre-breaker`; this crate only
//! fixes the shape every component reads.

use crate::time::WallClockMs;
use serde::{Deserialize, Serialize};

/// Per-destination circuit state (§3).
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Full breaker state for one destination (agent kind, provider, or
/// outbound channel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub destination: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub opened_at: Option<WallClockMs>,
}

impl CircuitBreakerState {
    pub fn closed(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
        }
    }
}
