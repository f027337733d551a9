//! The incident entity, its event log, and the closed set of event kinds
//! (SPEC_FULL.md §3).

use crate::agent::{AgentKind, AgentResult, ProposedAction};
use crate::id::{CorrelationId, EventId, IncidentId};
use crate::time::WallClockMs;
use serde::{Deserialize, Serialize};

/// Severity ordinal, 1 (least severe) to 5 (most severe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Severity(u8);

impl Severity {
    pub fn new(level: u8) -> Self {
        Self(level.clamp(1, 5))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

/// The unit of work (§3). Mutated only by appending events to its stream;
/// this struct is the projection `replay_state` produces, never a handle
/// that can be written through directly.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub kind: String,
    pub severity: Severity,
    pub submitted_at: WallClockMs,
    pub submitting_actor: String,
    pub description: String,
    pub affected_services: Vec<String>,
    pub version: u64,
    pub status: IncidentStatus,
}

/// Derived lifecycle status, not itself a wire event kind — projected from
/// the presence/absence of a terminal event.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Active,
    Resolved,
    Escalated,
    Failed,
}

impl IncidentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, IncidentStatus::Active)
    }
}

/// The closed set of event kinds (§3). Every payload is a struct variant
/// with its own schema, per the "replace dictionaries with tagged variants"
/// redesign flag in SPEC_FULL.md §9.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    IncidentStarted {
        kind: String,
        severity: Severity,
        submitting_actor: String,
        description: String,
        affected_services: Vec<String>,
    },
    AgentAssigned {
        agent_kind: AgentKind,
    },
    AgentProgress {
        agent_kind: AgentKind,
        milestone: String,
    },
    AgentCompleted {
        agent_kind: AgentKind,
        result: AgentResult,
    },
    AgentFailed {
        agent_kind: AgentKind,
        reason: String,
    },
    ConsensusReached {
        action_id: Option<String>,
        aggregated_confidence: f64,
        contributing_agents: Vec<AgentKind>,
    },
    ActionProposed {
        action: ProposedAction,
    },
    ActionExecuted {
        action_id: String,
        outcome: String,
    },
    ActionRolledBack {
        action_id: String,
        reason: String,
    },
    Escalated {
        reason: String,
        contenders: Vec<String>,
    },
    ResolutionComplete {
        action_id: String,
    },
    Failed {
        reason: String,
    },
    MetricsRecomputed {
        mean_mttr_ms: Option<u64>,
        data_quality: String,
    },
}

impl EventPayload {
    /// Terminal event kinds per the glossary: `ResolutionComplete`,
    /// `Escalated`, `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventPayload::ResolutionComplete { .. }
                | EventPayload::Escalated { .. }
                | EventPayload::Failed { .. }
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            EventPayload::IncidentStarted { .. } => "IncidentStarted",
            EventPayload::AgentAssigned { .. } => "AgentAssigned",
            EventPayload::AgentProgress { .. } => "AgentProgress",
            EventPayload::AgentCompleted { .. } => "AgentCompleted",
            EventPayload::AgentFailed { .. } => "AgentFailed",
            EventPayload::ConsensusReached { .. } => "ConsensusReached",
            EventPayload::ActionProposed { .. } => "ActionProposed",
            EventPayload::ActionExecuted { .. } => "ActionExecuted",
            EventPayload::ActionRolledBack { .. } => "ActionRolledBack",
            EventPayload::Escalated { .. } => "Escalated",
            EventPayload::ResolutionComplete { .. } => "ResolutionComplete",
            EventPayload::Failed { .. } => "Failed",
            EventPayload::MetricsRecomputed { .. } => "MetricsRecomputed",
        }
    }
}

/// An immutable, ordered record belonging to exactly one incident (§3).
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentEvent {
    pub event_id: EventId,
    pub incident_id: IncidentId,
    pub version: u64,
    pub timestamp: WallClockMs,
    pub payload: EventPayload,
    pub correlation_id: Option<CorrelationId>,
    /// Explicit forward-compatibility field per the redesign flag in
    /// SPEC_FULL.md §9: new payload shapes bump this rather than growing an
    /// open dictionary.
    #[serde(default = "schema_version_default")]
    pub schema_version: u32,
}

fn schema_version_default() -> u32 {
    1
}

impl IncidentEvent {
    pub fn new(
        incident_id: IncidentId,
        version: u64,
        timestamp: WallClockMs,
        payload: EventPayload,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            incident_id,
            version,
            timestamp,
            payload,
            correlation_id: None,
            schema_version: schema_version_default(),
        }
    }

    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Replays an ordered event slice into a projected `Incident`. Pure
/// function: no I/O, usable both by the event store's `replay_state` and
/// by tests asserting the idempotence law in SPEC_FULL.md §8.
pub fn replay(events: &[IncidentEvent]) -> Option<Incident> {
    let first = events.first()?;
    let EventPayload::IncidentStarted {
        kind,
        severity,
        submitting_actor,
        description,
        affected_services,
    } = &first.payload
    else {
        return None;
    };

    let mut incident = Incident {
        id: first.incident_id.clone(),
        kind: kind.clone(),
        severity: *severity,
        submitted_at: first.timestamp,
        submitting_actor: submitting_actor.clone(),
        description: description.clone(),
        affected_services: affected_services.clone(),
        version: first.version,
        status: IncidentStatus::Active,
    };

    for event in events {
        incident.version = event.version;
        match &event.payload {
            EventPayload::ResolutionComplete { .. } => incident.status = IncidentStatus::Resolved,
            EventPayload::Escalated { .. } => incident.status = IncidentStatus::Escalated,
            EventPayload::Failed { .. } => incident.status = IncidentStatus::Failed,
            _ => {}
        }
    }

    Some(incident)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(incident_id: &IncidentId, version: u64) -> IncidentEvent {
        IncidentEvent::new(
            incident_id.clone(),
            version,
            WallClockMs::from_millis(1_000),
            EventPayload::IncidentStarted {
                kind: "db_cascade".into(),
                severity: Severity::new(4),
                submitting_actor: "alertmanager".into(),
                description: "db pool exhausted".into(),
                affected_services: vec!["orders".into()],
            },
        )
    }

    #[test]
    fn replay_projects_active_status() {
        let id = IncidentId::from("i1");
        let events = vec![started(&id, 1)];
        let incident = replay(&events).unwrap();
        assert_eq!(incident.status, IncidentStatus::Active);
        assert_eq!(incident.version, 1);
    }

    #[test]
    fn replay_projects_terminal_status() {
        let id = IncidentId::from("i1");
        let events = vec![
            started(&id, 1),
            IncidentEvent::new(
                id.clone(),
                2,
                WallClockMs::from_millis(2_000),
                EventPayload::ResolutionComplete {
                    action_id: "scale_pool".into(),
                },
            ),
        ];
        let incident = replay(&events).unwrap();
        assert_eq!(incident.status, IncidentStatus::Resolved);
        assert!(incident.status.is_terminal());
    }

    #[test]
    fn empty_log_has_no_projection() {
        assert!(replay(&[]).is_none());
    }
}
