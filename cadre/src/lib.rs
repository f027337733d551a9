#![deny(missing_docs)]
//! # cadre — incident-response control plane
//!
//! A single import surface over the subsystem crates: event-sourced
//! incident state, a tiered agent pipeline behind circuit breakers and rate
//! limiters, weighted-consensus decision making, derived reliability
//! metrics, a live streaming fabric for dashboards, and a thin
//! request/response facade tying all of it together. Re-exports each
//! subsystem behind a Cargo feature, plus a `prelude` for the common path.

#[cfg(feature = "core")]
pub use cadre_core;
#[cfg(feature = "breaker")]
pub use cadre_breaker;
#[cfg(feature = "provider")]
pub use cadre_provider;
#[cfg(feature = "runtime")]
pub use cadre_runtime;
#[cfg(feature = "consensus")]
pub use cadre_consensus;
#[cfg(feature = "coordinator")]
pub use cadre_coordinator;
#[cfg(feature = "metrics")]
pub use cadre_metrics;
#[cfg(feature = "core")]
pub use cadre_store;
#[cfg(feature = "stream")]
pub use cadre_stream;
#[cfg(feature = "api")]
pub use cadre_api;
#[cfg(feature = "testing")]
pub use cadre_testing;

/// Happy-path imports for embedding a full control plane.
pub mod prelude {
    #[cfg(feature = "core")]
    pub use cadre_core::agent::{Agent, AgentInput, AgentKind, AgentResult, AgentStatus};
    #[cfg(feature = "core")]
    pub use cadre_core::consensus::{ConsensusDecision, EscalationReason};
    #[cfg(feature = "core")]
    pub use cadre_core::id::{AgentRunId, IncidentId, SessionId};
    #[cfg(feature = "core")]
    pub use cadre_core::incident::{EventPayload, Incident, IncidentEvent, IncidentStatus, Severity};
    #[cfg(feature = "core")]
    pub use cadre_core::time::{Clock, FixedClock, SystemClock};
    #[cfg(feature = "core")]
    pub use cadre_store::{EventStore, InMemoryEventStore};

    #[cfg(feature = "breaker")]
    pub use cadre_breaker::{BreakerConfig, CircuitBreaker};

    #[cfg(feature = "provider")]
    pub use cadre_provider::{Provider, ProviderGateway, TaskClass};

    #[cfg(feature = "runtime")]
    pub use cadre_runtime::{AgentRuntime, FallbackChain, ObserverRegistry};

    #[cfg(feature = "consensus")]
    pub use cadre_consensus::ConsensusEngine;

    #[cfg(feature = "coordinator")]
    pub use cadre_coordinator::{Coordinator, CoordinatorConfig};

    #[cfg(feature = "metrics")]
    pub use cadre_metrics::{MetricsConfig, MetricsService, MetricsSnapshot, MetricsWatcher};

    #[cfg(feature = "stream")]
    pub use cadre_stream::{Bus, BusConfig, StreamEnvelope};

    #[cfg(feature = "api")]
    pub use cadre_api::{CadreApi, Config, SubmitIncidentRequest, SubmitIncidentResponse};
}
