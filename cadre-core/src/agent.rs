//! Agent kinds, dependency levels, and the `Agent` execution trait
//! (SPEC_FULL.md §3, §4.4).

use crate::error::RuntimeError;
use crate::id::{AgentRunId, IncidentId};
use crate::time::DurationMs;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The closed set of agent kinds (SPEC_FULL.md §3).
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Detection,
    Diagnosis,
    Prediction,
    Resolution,
    Communication,
}

impl AgentKind {
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Detection,
        AgentKind::Diagnosis,
        AgentKind::Prediction,
        AgentKind::Resolution,
        AgentKind::Communication,
    ];

    /// Canonical consensus weight (§4.6). Communication is intentionally
    /// excluded from the vote per the Open Question decision in DESIGN.md:
    /// it scores the same 0.1 default as any unrecognized kind.
    pub fn canonical_weight(self) -> f64 {
        match self {
            AgentKind::Detection => 0.2,
            AgentKind::Diagnosis => 0.4,
            AgentKind::Prediction => 0.3,
            AgentKind::Resolution => 0.1,
            AgentKind::Communication => 0.1,
        }
    }

    /// Dependency stratum (§3): level 0 may always start; level L may start
    /// once at least one agent at a level < L has completed successfully.
    pub fn dependency_level(self) -> u8 {
        match self {
            AgentKind::Detection => 0,
            AgentKind::Diagnosis | AgentKind::Prediction => 1,
            AgentKind::Resolution => 2,
            AgentKind::Communication => 3,
        }
    }

    /// Tie-break order used by the consensus engine when aggregated
    /// confidences are equal (§4.6 step 3): resolution, diagnosis,
    /// prediction, detection, communication.
    pub fn tie_break_rank(self) -> u8 {
        match self {
            AgentKind::Resolution => 0,
            AgentKind::Diagnosis => 1,
            AgentKind::Prediction => 2,
            AgentKind::Detection => 3,
            AgentKind::Communication => 4,
        }
    }

    /// Soft/hard timeout budgets in seconds (§4.4).
    pub fn timeout_budget_secs(self) -> (u64, u64) {
        match self {
            AgentKind::Detection => (30, 60),
            AgentKind::Diagnosis => (120, 180),
            AgentKind::Prediction => (90, 150),
            AgentKind::Resolution => (180, 300),
            AgentKind::Communication => (10, 30),
        }
    }
}

/// Terminal status of a single agent invocation.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Completed,
    Failed,
    Skipped,
}

/// Risk classification of a proposed action (§3).
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskRank {
    Low,
    Medium,
    High,
    Critical,
}

/// An action an agent recommends the system take.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedAction {
    pub action_id: String,
    pub description: String,
    pub risk: RiskRank,
    pub reversible: bool,
    pub params: BTreeMap<String, serde_json::Value>,
    pub proposed_by: AgentKind,
}

impl ProposedAction {
    pub fn new(
        action_id: impl Into<String>,
        description: impl Into<String>,
        proposed_by: AgentKind,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            description: description.into(),
            risk: RiskRank::Low,
            reversible: true,
            params: BTreeMap::new(),
            proposed_by,
        }
    }

    /// Whether this action is tagged as preventive, per the C9 prevention
    /// count (§4.7): `action_id` carries the literal tag `preventive`.
    pub fn is_preventive(&self) -> bool {
        self.action_id.split(':').any(|part| part == "preventive")
    }
}

/// The result an agent invocation produces, persisted verbatim into an
/// `AgentCompleted`/`AgentFailed` event (§3). Deliberately not
/// `#[non_exhaustive]`: every `Agent` implementation across every crate in
/// the workspace builds one with a struct literal, so a forward-compatible
/// constructor would just be a second spelling of the same fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub kind: AgentKind,
    pub status: AgentStatus,
    pub confidence: f64,
    pub reasoning: String,
    pub evidence: Vec<String>,
    pub providers_used: Vec<String>,
    pub duration: DurationMs,
    pub proposed_action: Option<ProposedAction>,
}

impl AgentResult {
    /// Clamps confidence into [0, 1] per the confidence-adjustment rule in
    /// §4.4 step 3.
    pub fn clamp_confidence(&mut self) {
        self.confidence = self.confidence.clamp(0.0, 1.0);
    }
}

/// Missing-data reasons that lower an agent's reported confidence (§4.4).
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingDataReason {
    Logs,
    Metrics,
    Traces,
    StaleData,
}

impl MissingDataReason {
    pub fn confidence_penalty(self) -> f64 {
        match self {
            MissingDataReason::Logs => 0.20,
            MissingDataReason::Metrics => 0.15,
            MissingDataReason::Traces => 0.10,
            MissingDataReason::StaleData => 0.05,
        }
    }
}

/// Everything an agent invocation needs: incident identity plus whatever
/// context the runtime assembled for it. Carries new information only, not
/// accumulated state: an agent reads accumulated incident history from the
/// event store, not from this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInput {
    pub run_id: AgentRunId,
    pub incident_id: IncidentId,
    pub kind: AgentKind,
    #[serde(default)]
    pub missing_data: Vec<MissingDataReason>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Protocol boundary for a single agent invocation (§4.4). The trait is
/// intentionally one method: the runtime (`cadre-runtime`) owns the
/// timeout/fallback/confidence-adjustment envelope, progress emission, and
/// persistence; an `Agent` implementation is only responsible for producing
/// one `AgentResult` given one `AgentInput`.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn run(&self, input: AgentInput) -> Result<AgentResult, RuntimeError>;
}
