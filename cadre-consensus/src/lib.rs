//! The consensus engine (C8): aggregates agent recommendations into a
//! single autonomous action or an escalation (SPEC_FULL.md §4.6).
//!
//! The "aggregate then decide" shape follows `neuron-orch-kit::runner`'s
//! separation of execution (`OrchestratedRunner`) from interpretation
//! (`LocalEffectExecutor`): this engine plays the role of the interpreter
//! stage, consuming agent results rather than executing effects. The
//! grouping/aggregation/tie-break/contradiction-reconciliation algorithm
//! itself is new domain logic; no crate in the retrieval pack implements
//! anything like it.

use cadre_core::agent::{AgentKind, AgentResult, AgentStatus};
use cadre_core::consensus::{ConsensusDecision, EscalationReason};
pub use cadre_core::error::ConsensusError;
use cadre_provider::{ProviderGateway, RoutingHint};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default approval threshold (§4.6 step 4, §6.4).
pub const DEFAULT_THRESHOLD: f64 = 0.70;

/// Parses an evidence string of the form `assertion(key,value)`, per the
/// Byzantine-tolerance definition in §4.6 step 7.
fn parse_assertion(evidence: &str) -> Option<(String, String)> {
    let inner = evidence
        .strip_prefix("assertion(")?
        .strip_suffix(')')?;
    let (key, value) = inner.split_once(',')?;
    Some((key.trim().to_string(), value.trim().to_string()))
}

/// Aggregates weighted confidence for proposed actions and decides approval
/// or escalation.
pub struct ConsensusEngine {
    threshold: f64,
    gateway: Arc<ProviderGateway>,
}

impl ConsensusEngine {
    pub fn new(gateway: Arc<ProviderGateway>) -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            gateway,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Runs the full decision algorithm over one incident's completed agent
    /// results (§4.6).
    pub async fn decide(
        &self,
        results: &[AgentResult],
    ) -> Result<ConsensusDecision, ConsensusError> {
        let (retained, contradiction_escalation) = self.resolve_contradictions(results);
        if let Some(decision) = contradiction_escalation {
            return Ok(decision);
        }

        if !has_enough_core_agents(&retained) {
            let contenders = candidate_action_ids(&retained);
            return Ok(ConsensusDecision::Escalate {
                reason: EscalationReason::PartialAgentSet,
                contenders,
            });
        }

        let candidates = aggregate(&retained);
        if candidates.is_empty() {
            return Err(ConsensusError::NoProposals);
        }

        let winner = select_winner(&candidates);
        let contenders = candidates.iter().map(|c| c.action_id.clone()).collect::<Vec<_>>();

        if winner.aggregated_confidence < self.threshold {
            return Ok(ConsensusDecision::Escalate {
                reason: EscalationReason::BelowThreshold,
                contenders,
            });
        }

        let hint = RoutingHint::default();
        if let Err(err) = self.gateway.safety_check(&winner.action_id, &hint).await {
            tracing::warn!(action_id = %winner.action_id, error = %err, "consensus safety gate blocked action");
            return Ok(ConsensusDecision::Escalate {
                reason: EscalationReason::SafetyBlocked,
                contenders: vec![winner.action_id.clone()],
            });
        }

        Ok(ConsensusDecision::Approved {
            action_id: winner.action_id.clone(),
            aggregated_confidence: winner.aggregated_confidence,
            contributing_agents: winner.contributing_agents.clone(),
        })
    }

    /// Detects pairs of agents asserting contradictory facts (§4.6 step 7):
    /// two non-empty evidence strings of the form `assertion(key,value)`
    /// with the same key but different values. The lower-weight agent's
    /// result is discarded from the working set; an exact weight tie
    /// escalates immediately.
    fn resolve_contradictions(
        &self,
        results: &[AgentResult],
    ) -> (Vec<AgentResult>, Option<ConsensusDecision>) {
        let mut discarded = vec![false; results.len()];

        for i in 0..results.len() {
            for j in (i + 1)..results.len() {
                if discarded[i] || discarded[j] {
                    continue;
                }
                if contradicts(&results[i], &results[j]) {
                    let wi = results[i].kind.canonical_weight();
                    let wj = results[j].kind.canonical_weight();
                    if (wi - wj).abs() < f64::EPSILON {
                        let contenders = [&results[i], &results[j]]
                            .iter()
                            .filter_map(|r| r.proposed_action.as_ref().map(|a| a.action_id.clone()))
                            .collect();
                        return (
                            vec![],
                            Some(ConsensusDecision::Escalate {
                                reason: EscalationReason::ContradictoryEvidence,
                                contenders,
                            }),
                        );
                    } else if wi < wj {
                        discarded[i] = true;
                    } else {
                        discarded[j] = true;
                    }
                }
            }
        }

        let retained = results
            .iter()
            .enumerate()
            .filter(|(idx, _)| !discarded[*idx])
            .map(|(_, r)| r.clone())
            .collect();
        (retained, None)
    }
}

fn contradicts(a: &AgentResult, b: &AgentResult) -> bool {
    let a_assertions: Vec<_> = a.evidence.iter().filter_map(|e| parse_assertion(e)).collect();
    let b_assertions: Vec<_> = b.evidence.iter().filter_map(|e| parse_assertion(e)).collect();
    a_assertions.iter().any(|(ak, av)| {
        b_assertions
            .iter()
            .any(|(bk, bv)| ak == bk && av != bv)
    })
}

/// Fewer than two agents of levels 1 or 2 succeeded ⇒ escalate
/// unconditionally (§4.6 step 6).
fn has_enough_core_agents(results: &[AgentResult]) -> bool {
    results
        .iter()
        .filter(|r| {
            r.status == AgentStatus::Completed
                && matches!(r.kind.dependency_level(), 1 | 2)
        })
        .count()
        >= 2
}

struct Candidate {
    action_id: String,
    aggregated_confidence: f64,
    contributing_agents: Vec<AgentKind>,
}

/// Groups by `action_id` and aggregates weighted confidence
/// (§4.6 steps 1-2). Commutative and associative by construction: a plain
/// sum over contributions, independent of input order.
fn aggregate(results: &[AgentResult]) -> Vec<Candidate> {
    let mut groups: BTreeMap<String, (f64, Vec<AgentKind>)> = BTreeMap::new();
    for result in results {
        let Some(action) = &result.proposed_action else {
            continue;
        };
        let weight = result.kind.canonical_weight();
        let entry = groups
            .entry(action.action_id.clone())
            .or_insert((0.0, Vec::new()));
        entry.0 += weight * result.confidence;
        entry.1.push(result.kind);
    }
    groups
        .into_iter()
        .map(|(action_id, (confidence, agents))| Candidate {
            action_id,
            aggregated_confidence: confidence,
            contributing_agents: agents,
        })
        .collect()
}

fn candidate_action_ids(results: &[AgentResult]) -> Vec<String> {
    results
        .iter()
        .filter_map(|r| r.proposed_action.as_ref().map(|a| a.action_id.clone()))
        .collect()
}

/// Picks the candidate with the greatest aggregated confidence, breaking
/// ties deterministically by `(action_id lexicographic, then proposer kind
/// tie-break rank)` (§4.6 step 3).
fn select_winner(candidates: &[Candidate]) -> &Candidate {
    candidates
        .iter()
        .min_by(|a, b| {
            b.aggregated_confidence
                .partial_cmp(&a.aggregated_confidence)
                .unwrap()
                .then_with(|| a.action_id.cmp(&b.action_id))
                .then_with(|| {
                    let a_rank = a.contributing_agents.iter().map(|k| k.tie_break_rank()).min();
                    let b_rank = b.contributing_agents.iter().map(|k| k.tie_break_rank()).min();
                    a_rank.cmp(&b_rank)
                })
        })
        .expect("candidates is non-empty")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadre_core::agent::ProposedAction;
    use cadre_core::time::DurationMs;
    use cadre_provider::local::LocalProvider;
    use cadre_provider::TaskClass;

    fn result(kind: AgentKind, confidence: f64, action_id: &str) -> AgentResult {
        AgentResult {
            kind,
            status: AgentStatus::Completed,
            confidence,
            reasoning: "because".into(),
            evidence: vec![],
            providers_used: vec![],
            duration: DurationMs::from_millis(10),
            proposed_action: Some(ProposedAction::new(action_id, "do it", kind)),
        }
    }

    fn engine() -> ConsensusEngine {
        let gateway = Arc::new(ProviderGateway::new(vec![Arc::new(LocalProvider::new(
            "local",
            TaskClass::Fast,
        ))]));
        ConsensusEngine::new(gateway)
    }

    #[tokio::test]
    async fn happy_path_approves_with_exact_aggregated_confidence() {
        let results = vec![
            result(AgentKind::Detection, 0.94, "scale_pool"),
            result(AgentKind::Diagnosis, 0.97, "scale_pool"),
            result(AgentKind::Prediction, 0.73, "scale_pool"),
            result(AgentKind::Resolution, 0.91, "scale_pool"),
        ];
        let decision = engine().decide(&results).await.unwrap();
        match decision {
            ConsensusDecision::Approved {
                action_id,
                aggregated_confidence,
                ..
            } => {
                assert_eq!(action_id, "scale_pool");
                assert!((aggregated_confidence - 0.886).abs() < 1e-9);
            }
            other => panic!("expected approval, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn below_threshold_escalates() {
        let results = vec![
            result(AgentKind::Detection, 0.5, "scale_pool"),
            result(AgentKind::Diagnosis, 0.5, "scale_pool"),
            result(AgentKind::Prediction, 0.5, "scale_pool"),
            result(AgentKind::Resolution, 0.5, "scale_pool"),
        ];
        let decision = engine().decide(&results).await.unwrap();
        match decision {
            ConsensusDecision::Escalate { reason, .. } => {
                assert_eq!(reason, EscalationReason::BelowThreshold)
            }
            other => panic!("expected escalation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn partial_agent_failure_escalates_below_threshold() {
        let results = vec![
            result(AgentKind::Prediction, 0.8, "restart"),
            result(AgentKind::Resolution, 0.8, "restart"),
        ];
        let decision = engine().decide(&results).await.unwrap();
        match decision {
            ConsensusDecision::Escalate { reason, contenders } => {
                assert_eq!(reason, EscalationReason::BelowThreshold);
                assert_eq!(contenders, vec!["restart".to_string()]);
            }
            other => panic!("expected escalation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fewer_than_two_core_agents_escalates_unconditionally() {
        let results = vec![result(AgentKind::Resolution, 0.99, "restart")];
        let decision = engine().decide(&results).await.unwrap();
        match decision {
            ConsensusDecision::Escalate { reason, .. } => {
                assert_eq!(reason, EscalationReason::PartialAgentSet)
            }
            other => panic!("expected escalation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn safety_block_escalates() {
        let gateway = Arc::new(ProviderGateway::new(vec![Arc::new(
            LocalProvider::new("local", TaskClass::Fast).blocking("restart"),
        )]));
        let engine = ConsensusEngine::new(gateway);
        let results = vec![
            result(AgentKind::Diagnosis, 0.9, "restart"),
            result(AgentKind::Prediction, 0.9, "restart"),
        ];
        let decision = engine.decide(&results).await.unwrap();
        match decision {
            ConsensusDecision::Escalate { reason, .. } => {
                assert_eq!(reason, EscalationReason::SafetyBlocked)
            }
            other => panic!("expected escalation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn contradictory_evidence_discards_lower_weight_agent() {
        let mut detection = result(AgentKind::Detection, 0.9, "restart");
        detection.evidence = vec!["assertion(root_cause,network)".into()];
        let mut diagnosis = result(AgentKind::Diagnosis, 1.0, "scale_pool");
        diagnosis.evidence = vec!["assertion(root_cause,db)".into()];
        let mut prediction = result(AgentKind::Prediction, 1.0, "scale_pool");

        prediction.evidence = vec![];
        let results = vec![detection, diagnosis, prediction];
        let decision = engine().decide(&results).await.unwrap();
        // detection (weight 0.2) loses to diagnosis (weight 0.4); only
        // diagnosis + prediction remain, both proposing scale_pool.
        match decision {
            ConsensusDecision::Approved { action_id, .. } => assert_eq!(action_id, "scale_pool"),
            other => panic!("expected approval, got {other:?}"),
        }
    }
}
