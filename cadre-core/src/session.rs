//! Client session data model for the streaming fabric (SPEC_FULL.md §3,
//! §4.8). Queue mechanics and dispatch live in `cadre-stream`; this crate
//! only fixes the session's identity and filter shape.

use crate::id::{IncidentId, SessionId};
use crate::time::WallClockMs;
use serde::{Deserialize, Serialize};

/// Access class attached to a streaming session (§4.8).
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardTag {
    /// Receives full live updates.
    Ops,
    /// Restricted to historical/read-only scope.
    Demo,
    /// Restricted to historical/read-only scope.
    Transparency,
}

impl DashboardTag {
    /// Parses a wire-level tag string; unknown tags are rejected with
    /// `UnauthorizedDashboard` by the caller (§4.8).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ops" => Some(DashboardTag::Ops),
            "demo" => Some(DashboardTag::Demo),
            "transparency" => Some(DashboardTag::Transparency),
            _ => None,
        }
    }

    /// Only `ops` sessions receive live updates for live incidents; the
    /// others are pruned to historical-only scope.
    pub fn receives_live_updates(self) -> bool {
        matches!(self, DashboardTag::Ops)
    }
}

/// A subscription filter over incidents and event kinds (§4.8).
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    /// Empty means "all incidents".
    pub incident_ids: Vec<IncidentId>,
    /// Empty means "all event kinds".
    pub event_kinds: Vec<String>,
}

impl SubscriptionFilter {
    pub fn matches_incident(&self, incident_id: &IncidentId) -> bool {
        self.incident_ids.is_empty() || self.incident_ids.contains(incident_id)
    }

    pub fn matches_kind(&self, kind: &str) -> bool {
        self.event_kinds.is_empty() || self.event_kinds.iter().any(|k| k == kind)
    }
}

/// A connected stream subscriber (§3). The queue itself is owned by
/// `cadre-stream`'s session actor; this is the durable identity/metadata the
/// rest of the system reasons about.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSession {
    pub session_id: SessionId,
    pub client_id: String,
    pub dashboard_tag: DashboardTag,
    pub filter: SubscriptionFilter,
    pub watermark: u64,
    pub last_heartbeat: WallClockMs,
}

impl ClientSession {
    /// Opens a fresh session at watermark 0 (§4.8). `cadre-stream` owns the
    /// actual queue; this only records identity and filter.
    pub fn new(
        session_id: SessionId,
        client_id: impl Into<String>,
        dashboard_tag: DashboardTag,
        filter: SubscriptionFilter,
        now: WallClockMs,
    ) -> Self {
        Self {
            session_id,
            client_id: client_id.into(),
            dashboard_tag,
            filter,
            watermark: 0,
            last_heartbeat: now,
        }
    }
}

/// Pair a client submits on reconnection to resume from (§4.8, §6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeFrom {
    pub incident_id: IncidentId,
    pub version: u64,
}

/// Reason a session was closed by the server (§6.2, §4.8).
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCloseReason {
    SlowConsumer,
    Shutdown,
    Unauthorized,
}
