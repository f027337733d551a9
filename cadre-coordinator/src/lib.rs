//! The swarm coordinator (C7): runs the per-incident DAG, scheduling agents
//! by dependency level and collecting results (SPEC_FULL.md §4.5).
//!
//! Grounded directly on `neuron-orch-local::LocalOrch::dispatch_many`
//! (`tokio::spawn` per operator, join-in-order collection, mapping
//! `JoinError` to a dispatch-failure variant) for the concurrent-dispatch
//! shape, and on `neuron-orch-kit::runner::OrchestratedRunner` (a
//! queue-based follow-up loop with a `max_followups` safety bound) adapted
//! here into a level-based scheduling loop bounded by a wall-clock deadline
//! instead of a follow-up count.

use cadre_consensus::ConsensusEngine;
use cadre_core::agent::{AgentInput, AgentKind, AgentResult, AgentStatus};
use cadre_core::consensus::{ConsensusDecision, EscalationReason};
pub use cadre_core::error::CoordinatorError;
use cadre_core::id::{AgentRunId, IncidentId};
use cadre_core::incident::EventPayload;
use cadre_runtime::{AgentRuntime, FallbackChain};
use cadre_store::EventStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Coordinator-wide tunables (§4.5, §5, §6.4, §7).
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Upper wall-clock bound after which the coordinator forces escalation
    /// (§7, default ≈ 12 minutes).
    pub deadline: Duration,
    /// Global cap on incidents coordinated concurrently (§5, default 50).
    pub max_concurrent_incidents: usize,
    /// Grace window a cancelled run is given to return promptly (§5).
    pub cancellation_grace: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(12 * 60),
            max_concurrent_incidents: 50,
            cancellation_grace: Duration::from_secs(2),
        }
    }
}

/// Drives the staged agent DAG for incidents, one coordinator task per
/// incident at a time, with no shared mutable state across incidents beyond
/// the event store and the global concurrency permit.
pub struct Coordinator {
    store: Arc<dyn EventStore>,
    runtime: Arc<AgentRuntime>,
    consensus: Arc<ConsensusEngine>,
    chains: HashMap<AgentKind, Arc<FallbackChain>>,
    config: CoordinatorConfig,
    incident_permits: Arc<Semaphore>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn EventStore>,
        runtime: Arc<AgentRuntime>,
        consensus: Arc<ConsensusEngine>,
        chains: HashMap<AgentKind, Arc<FallbackChain>>,
        config: CoordinatorConfig,
    ) -> Self {
        let incident_permits = Arc::new(Semaphore::new(config.max_concurrent_incidents));
        Self {
            store,
            runtime,
            consensus,
            chains,
            config,
            incident_permits,
        }
    }

    /// Runs the full per-incident workflow: schedule by dependency level,
    /// collect results, hand off to consensus, persist the terminal event.
    /// Assumes `IncidentStarted` has already been appended by the caller
    /// (the public API surface, per the §2 data flow).
    pub async fn run_incident(
        &self,
        incident_id: IncidentId,
        cancel: CancellationToken,
    ) -> Result<ConsensusDecision, CoordinatorError> {
        let _permit = self
            .incident_permits
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore never closed");

        match tokio::time::timeout(
            self.config.deadline,
            self.run_incident_inner(incident_id.clone(), cancel),
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => {
                let mut version = self.store.head_version(&incident_id).await;
                self.append(
                    &incident_id,
                    &mut version,
                    EventPayload::Escalated {
                        reason: EscalationReason::DeadlineExceeded.as_str().to_string(),
                        contenders: vec![],
                    },
                )
                .await?;
                Ok(ConsensusDecision::Escalate {
                    reason: EscalationReason::DeadlineExceeded,
                    contenders: vec![],
                })
            }
        }
    }

    async fn append(
        &self,
        incident_id: &IncidentId,
        version: &mut u64,
        payload: EventPayload,
    ) -> Result<(), CoordinatorError> {
        let event = self.store.append(incident_id, *version, payload).await?;
        *version = event.version;
        Ok(())
    }

    async fn run_incident_inner(
        &self,
        incident_id: IncidentId,
        cancel: CancellationToken,
    ) -> Result<ConsensusDecision, CoordinatorError> {
        let mut version = self.store.head_version(&incident_id).await;
        let mut completed_levels: HashSet<u8> = HashSet::new();
        let mut started: HashSet<AgentKind> = HashSet::new();
        let mut results: Vec<AgentResult> = Vec::new();
        let mut running: JoinSet<(AgentKind, Result<AgentResult, cadre_core::RuntimeError>)> =
            JoinSet::new();

        loop {
            let schedulable: Vec<AgentKind> = AgentKind::ALL
                .into_iter()
                .filter(|kind| {
                    !started.contains(kind)
                        && self.chains.contains_key(kind)
                        && (kind.dependency_level() == 0
                            || completed_levels.iter().any(|&l| l < kind.dependency_level()))
                })
                .collect();

            for kind in schedulable {
                started.insert(kind);
                self.append(
                    &incident_id,
                    &mut version,
                    EventPayload::AgentAssigned { agent_kind: kind },
                )
                .await?;

                let runtime = self.runtime.clone();
                let chain = self.chains[&kind].clone();
                let input = AgentInput {
                    run_id: AgentRunId::new(),
                    incident_id: incident_id.clone(),
                    kind,
                    missing_data: vec![],
                    metadata: serde_json::Value::Null,
                };
                let spawn_incident_id = incident_id.clone();
                running.spawn(async move {
                    let outcome = runtime.run(&spawn_incident_id, &chain, input, &[]).await;
                    (kind, outcome)
                });
            }

            let all_terminated = started.len() == self.chains.len() && running.is_empty();
            if all_terminated {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return self.handle_cancellation(&incident_id, &mut version, running).await;
                }
                joined = running.join_next(), if !running.is_empty() => {
                    let Some(joined) = joined else { continue };
                    let (kind, outcome) = joined.map_err(|e| {
                        CoordinatorError::Other(Box::new(e))
                    })?;
                    match outcome {
                        Ok(result) => {
                            completed_levels.insert(kind.dependency_level());
                            self.append(
                                &incident_id,
                                &mut version,
                                EventPayload::AgentCompleted { agent_kind: kind, result: result.clone() },
                            )
                            .await?;
                            results.push(result);
                        }
                        Err(err) => {
                            tracing::warn!(incident_id = %incident_id, agent_kind = ?kind, error = %err, "agent failed, marking skipped and continuing");
                            self.append(
                                &incident_id,
                                &mut version,
                                EventPayload::AgentFailed { agent_kind: kind, reason: err.to_string() },
                            )
                            .await?;
                        }
                    }
                }
            }
        }

        let decision = self
            .consensus
            .decide(&results)
            .await
            .map_err(|e| CoordinatorError::Other(Box::new(e)))?;

        self.append(
            &incident_id,
            &mut version,
            EventPayload::ConsensusReached {
                action_id: match &decision {
                    ConsensusDecision::Approved { action_id, .. } => Some(action_id.clone()),
                    ConsensusDecision::Escalate { .. } => None,
                    _ => unreachable!(),
                },
                aggregated_confidence: match &decision {
                    ConsensusDecision::Approved {
                        aggregated_confidence,
                        ..
                    } => *aggregated_confidence,
                    ConsensusDecision::Escalate { .. } => 0.0,
                    _ => unreachable!(),
                },
                contributing_agents: match &decision {
                    ConsensusDecision::Approved {
                        contributing_agents,
                        ..
                    } => contributing_agents.clone(),
                    ConsensusDecision::Escalate { .. } => vec![],
                    _ => unreachable!(),
                },
            },
        )
        .await?;

        match &decision {
            ConsensusDecision::Approved { action_id, .. } => {
                self.append(
                    &incident_id,
                    &mut version,
                    EventPayload::ActionExecuted {
                        action_id: action_id.clone(),
                        outcome: "applied".to_string(),
                    },
                )
                .await?;
                self.append(
                    &incident_id,
                    &mut version,
                    EventPayload::ResolutionComplete {
                        action_id: action_id.clone(),
                    },
                )
                .await?;
            }
            ConsensusDecision::Escalate { reason, contenders } => {
                self.append(
                    &incident_id,
                    &mut version,
                    EventPayload::Escalated {
                        reason: reason.as_str().to_string(),
                        contenders: contenders.clone(),
                    },
                )
                .await?;
            }
            _ => unreachable!(),
        }

        Ok(decision)
    }

    async fn handle_cancellation(
        &self,
        incident_id: &IncidentId,
        version: &mut u64,
        mut running: JoinSet<(AgentKind, Result<AgentResult, cadre_core::RuntimeError>)>,
    ) -> Result<ConsensusDecision, CoordinatorError> {
        tracing::info!(incident_id = %incident_id, "incident cancelled, waiting for grace period");
        let _ = tokio::time::timeout(self.config.cancellation_grace, async {
            while running.join_next().await.is_some() {}
        })
        .await;
        running.abort_all();

        self.append(
            incident_id,
            version,
            EventPayload::Failed {
                reason: "cancelled".to_string(),
            },
        )
        .await?;

        Ok(ConsensusDecision::Escalate {
            reason: EscalationReason::Cancelled,
            contenders: vec![],
        })
    }
}
