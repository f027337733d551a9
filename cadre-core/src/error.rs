//! Error taxonomy shared by every component boundary (SPEC_FULL.md §7, §10.3).
//!
//! Each enum is closed except for a catch-all `Other` variant, carries a
//! stable `kind()` discriminant clients can branch on without matching text,
//! and exposes `is_retryable()` so generic retry loops don't need to match
//! every variant by hand.

use crate::id::IncidentId;
use thiserror::Error;

/// Stable error-kind discriminants (SPEC_FULL.md §6.1). Clients branch on
/// this, never on the `Display` text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    VersionConflict,
    IncidentTerminated,
    IncidentNotFound,
    UnauthorizedDashboard,
    RateLimited,
    SafetyViolation,
    Unavailable,
    Cancelled,
    ValidationError,
    Other,
}

/// Errors raised by the event store (C2).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StoreError {
    /// `append` was called with an `expected_version` that no longer matches
    /// the current head.
    #[error("version conflict on {incident_id}: expected {expected}, head is {head}")]
    VersionConflict {
        incident_id: IncidentId,
        expected: u64,
        head: u64,
    },

    /// `append` was called against an incident that already reached a
    /// terminal event.
    #[error("incident {0} is already terminal")]
    IncidentTerminated(IncidentId),

    /// The incident referenced does not exist in the store.
    #[error("incident {0} not found")]
    IncidentNotFound(IncidentId),

    /// The store's own retry budget for a transient backend failure was
    /// exhausted.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::VersionConflict { .. } => ErrorKind::VersionConflict,
            StoreError::IncidentTerminated(_) => ErrorKind::IncidentTerminated,
            StoreError::IncidentNotFound(_) => ErrorKind::IncidentNotFound,
            StoreError::Unavailable(_) => ErrorKind::Unavailable,
            StoreError::Other(_) => ErrorKind::Other,
        }
    }

    /// Conflict errors are retried by replaying and re-appending; transient
    /// `Unavailable` errors are retried with backoff. Terminal/not-found are
    /// never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::VersionConflict { .. } | StoreError::Unavailable(_)
        )
    }
}

/// Errors raised by the provider gateway (C4).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    RequestFailed(String),

    #[error("provider timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("safety check blocked: {reason}")]
    SafetyViolation { reason: String },

    #[error("no healthy provider for task class {0}")]
    NoHealthyProvider(String),

    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::RequestFailed(_) | ProviderError::Timeout(_) => ErrorKind::Unavailable,
            ProviderError::RateLimited(_) => ErrorKind::RateLimited,
            ProviderError::SafetyViolation { .. } => ErrorKind::SafetyViolation,
            ProviderError::NoHealthyProvider(_) => ErrorKind::Unavailable,
            ProviderError::Other(_) => ErrorKind::Other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RequestFailed(_) | ProviderError::Timeout(_)
        )
    }
}

/// Errors raised by the circuit breaker / rate limiter (C5).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BreakerError {
    #[error("circuit open for {destination}")]
    CircuitOpen { destination: String },

    #[error("rate limited for {destination}")]
    RateLimited { destination: String },

    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl BreakerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BreakerError::CircuitOpen { .. } => ErrorKind::Unavailable,
            BreakerError::RateLimited { .. } => ErrorKind::RateLimited,
            BreakerError::Other(_) => ErrorKind::Other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BreakerError::RateLimited { .. })
    }
}

/// Errors raised by the agent runtime (C6).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("agent timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("agent result failed validation: {0}")]
    ValidationFailed(String),

    #[error("fallback chain exhausted: {0}")]
    ChainExhausted(String),

    #[error("cancelled")]
    Cancelled,

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl RuntimeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RuntimeError::Timeout(_))
    }
}

/// Errors raised by the swarm coordinator (C7).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("incident {0} not found")]
    IncidentNotFound(IncidentId),

    #[error("incident {0} already terminal")]
    IncidentTerminated(IncidentId),

    #[error("coordinator deadline exceeded for {0}")]
    DeadlineExceeded(IncidentId),

    #[error("cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl CoordinatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoordinatorError::IncidentNotFound(_) => ErrorKind::IncidentNotFound,
            CoordinatorError::IncidentTerminated(_) => ErrorKind::IncidentTerminated,
            CoordinatorError::DeadlineExceeded(_) => ErrorKind::Unavailable,
            CoordinatorError::Cancelled => ErrorKind::Cancelled,
            CoordinatorError::Store(e) => e.kind(),
            CoordinatorError::Other(_) => ErrorKind::Other,
        }
    }
}

/// Errors raised by the consensus engine (C8).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("no proposed actions to aggregate")]
    NoProposals,

    #[error("safety check failed: {0}")]
    SafetyCheckFailed(#[from] ProviderError),

    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors raised by the streaming fabric (C10).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("unauthorized dashboard tag: {0}")]
    UnauthorizedDashboard(String),

    #[error("session closed: slow consumer")]
    SlowConsumer,

    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl StreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::UnauthorizedDashboard(_) => ErrorKind::UnauthorizedDashboard,
            StreamError::SlowConsumer => ErrorKind::Other,
            StreamError::Other(_) => ErrorKind::Other,
        }
    }
}

/// Errors raised by the public API surface (C11).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Validation(_) => ErrorKind::ValidationError,
            ApiError::Unauthorized(_) => ErrorKind::UnauthorizedDashboard,
            ApiError::Coordinator(e) => e.kind(),
            ApiError::Store(e) => e.kind(),
            ApiError::Stream(e) => e.kind(),
            ApiError::Other(_) => ErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_conflict_is_retryable() {
        let err = StoreError::VersionConflict {
            incident_id: IncidentId::from("i1"),
            expected: 2,
            head: 3,
        };
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::VersionConflict);
    }

    #[test]
    fn not_found_is_not_retryable() {
        let err = StoreError::IncidentNotFound(IncidentId::from("i1"));
        assert!(!err.is_retryable());
    }
}
