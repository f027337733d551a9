//! The consensus engine's decision type (SPEC_FULL.md §3, §4.6). The
//! aggregation algorithm itself lives in `cadre-consensus`; this crate only
//! fixes the shape of its output so every component agrees on it.

use crate::agent::AgentKind;
use serde::{Deserialize, Serialize};

/// Outcome of running the consensus algorithm over one incident's agent
/// results.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConsensusDecision {
    Approved {
        action_id: String,
        aggregated_confidence: f64,
        contributing_agents: Vec<AgentKind>,
    },
    Escalate {
        reason: EscalationReason,
        contenders: Vec<String>,
    },
}

/// Closed set of reasons consensus can escalate, each matching a literal
/// `reason` string used by the event log and wire protocol (§4.6, §7).
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    BelowThreshold,
    SafetyBlocked,
    PartialAgentSet,
    ContradictoryEvidence,
    DeadlineExceeded,
    Cancelled,
}

impl EscalationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EscalationReason::BelowThreshold => "below_threshold",
            EscalationReason::SafetyBlocked => "safety_blocked",
            EscalationReason::PartialAgentSet => "partial_agent_set",
            EscalationReason::ContradictoryEvidence => "contradictory_evidence",
            EscalationReason::DeadlineExceeded => "deadline_exceeded",
            EscalationReason::Cancelled => "cancelled",
        }
    }
}
