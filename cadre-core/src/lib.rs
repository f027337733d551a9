//! Core protocol traits and domain types for the incident-response control
//! plane.
//!
//! This crate fixes the shapes every other `cadre-*` crate builds against:
//! typed identifiers, wall-clock time, the closed error taxonomy, the
//! incident/event data model, agent kinds and the `Agent` trait, the
//! consensus decision shape, client-session and circuit-breaker data, and
//! the read-only RAG boundary (C3). It contains no I/O and no scheduling —
//! those live in `cadre-store`, `cadre-runtime`, `cadre-coordinator`,
//! `cadre-consensus`, `cadre-breaker`, and `cadre-stream`.
#![allow(clippy::module_inception)]

pub mod agent;
pub mod breaker;
pub mod consensus;
pub mod error;
pub mod id;
pub mod incident;
pub mod rag;
pub mod session;
#[cfg(feature = "test-utils")]
pub mod test_utils;
pub mod time;

pub use agent::{
    Agent, AgentInput, AgentKind, AgentResult, AgentStatus, MissingDataReason, ProposedAction,
    RiskRank,
};
pub use breaker::{CircuitBreakerState, CircuitState};
pub use consensus::{ConsensusDecision, EscalationReason};
pub use error::{
    ApiError, BreakerError, ConsensusError, CoordinatorError, ErrorKind, ProviderError,
    RuntimeError, StoreError, StreamError,
};
pub use id::{AgentRunId, CorrelationId, EventId, IncidentId, SessionId};
pub use incident::{replay, EventPayload, Incident, IncidentEvent, IncidentStatus, Severity};
pub use rag::{KnowledgeSnippet, KnowledgeSource};
pub use session::{
    ClientSession, DashboardTag, ResumeFrom, SessionCloseReason, SubscriptionFilter,
};
pub use time::{Clock, DurationMs, FixedClock, SystemClock, WallClockMs};
