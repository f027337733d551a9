//! The agent runtime (C6): a uniform execution envelope for every agent
//! kind — timeout, fallback chain, confidence reporting (SPEC_FULL.md §4.4).
//!
//! Grounded on `layer0::operator`/`layer0::turn`'s timeout/exit-reason shape
//! and on `neuron-hooks::HookRegistry` (`Vec<Arc<dyn Hook>>`,
//! short-circuiting dispatch by hook point) for the progress-observer
//! registry used here to fan out `AgentProgress` milestones.

use async_trait::async_trait;
use cadre_core::agent::{Agent, AgentInput, AgentResult, MissingDataReason};
use cadre_core::{AgentKind, AgentRunId, IncidentId, RuntimeError};
use std::sync::Arc;
use std::time::Duration;

/// Natural milestones an agent invocation passes through (§4.4 step 4).
#[derive(Debug, Clone)]
pub enum ProgressMilestone {
    Start,
    StrategyAdvanced { strategy_index: usize },
    ProviderCallBegin,
    ProviderCallEnd,
    Hypothesis(String),
    Terminal,
}

/// Observes runtime progress without being able to halt it — progress
/// reporting is best-effort: errors are logged, never fatal.
#[async_trait]
pub trait ProgressObserver: Send + Sync {
    async fn on_progress(
        &self,
        incident_id: &IncidentId,
        run_id: &AgentRunId,
        kind: AgentKind,
        milestone: ProgressMilestone,
    );
}

/// Fan-out registry of progress observers, in the shape of a `HookRegistry`:
/// every registered observer is notified; a failure in one observer never
/// stops dispatch to the others or the agent invocation itself.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn ProgressObserver>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, observer: Arc<dyn ProgressObserver>) {
        self.observers.push(observer);
    }

    async fn notify(
        &self,
        incident_id: &IncidentId,
        run_id: &AgentRunId,
        kind: AgentKind,
        milestone: ProgressMilestone,
    ) {
        for observer in &self.observers {
            observer
                .on_progress(incident_id, run_id, kind, milestone.clone())
                .await;
        }
    }
}

/// The ordered strategies an agent kind tries in sequence (§4.4 step 2):
/// `primary → secondary → safe_mode`. Exhausting all of them is the
/// runtime's signal to the coordinator to treat the agent as failed, at
/// which point the coordinator's own policy decides whether to escalate.
pub struct FallbackChain {
    pub kind: AgentKind,
    pub strategies: Vec<Arc<dyn Agent>>,
}

impl FallbackChain {
    pub fn new(kind: AgentKind, strategies: Vec<Arc<dyn Agent>>) -> Self {
        Self { kind, strategies }
    }
}

/// Runs the uniform agent envelope: timeout, fallback chain, confidence
/// adjustment, progress notification.
pub struct AgentRuntime {
    observers: ObserverRegistry,
}

impl AgentRuntime {
    pub fn new(observers: ObserverRegistry) -> Self {
        Self { observers }
    }

    /// Executes `chain` for one invocation, applying the hard timeout cap
    /// for `chain.kind`, advancing through strategies only on validated
    /// failure, and adjusting confidence downward per `missing_data`
    /// (§4.4 steps 1-3).
    pub async fn run(
        &self,
        incident_id: &IncidentId,
        chain: &FallbackChain,
        input: AgentInput,
        missing_data: &[MissingDataReason],
    ) -> Result<AgentResult, RuntimeError> {
        let (soft_secs, hard_secs) = chain.kind.timeout_budget_secs();
        let soft_timeout = Duration::from_secs(soft_secs);
        let hard_timeout = Duration::from_secs(hard_secs);

        self.observers
            .notify(
                incident_id,
                &input.run_id,
                chain.kind,
                ProgressMilestone::Start,
            )
            .await;

        let outcome = tokio::time::timeout(
            hard_timeout,
            self.run_chain(incident_id, chain, input.clone(), soft_timeout),
        )
        .await;

        let result = match outcome {
            Ok(inner) => inner,
            Err(_elapsed) => Err(RuntimeError::Timeout(hard_timeout)),
        };

        self.observers
            .notify(
                incident_id,
                &input.run_id,
                chain.kind,
                ProgressMilestone::Terminal,
            )
            .await;

        let mut result = result?;
        for reason in missing_data {
            result.confidence -= reason.confidence_penalty();
        }
        result.clamp_confidence();
        Ok(result)
    }

    async fn run_chain(
        &self,
        incident_id: &IncidentId,
        chain: &FallbackChain,
        input: AgentInput,
        soft_timeout: Duration,
    ) -> Result<AgentResult, RuntimeError> {
        if chain.strategies.is_empty() {
            return Err(RuntimeError::ChainExhausted(format!(
                "no strategies registered for {:?}",
                chain.kind
            )));
        }

        let mut last_err = None;
        for (index, strategy) in chain.strategies.iter().enumerate() {
            if index > 0 {
                self.observers
                    .notify(
                        incident_id,
                        &input.run_id,
                        chain.kind,
                        ProgressMilestone::StrategyAdvanced {
                            strategy_index: index,
                        },
                    )
                    .await;
            }

            self.observers
                .notify(
                    incident_id,
                    &input.run_id,
                    chain.kind,
                    ProgressMilestone::ProviderCallBegin,
                )
                .await;
            let outcome = tokio::time::timeout(soft_timeout, strategy.run(input.clone())).await;
            self.observers
                .notify(
                    incident_id,
                    &input.run_id,
                    chain.kind,
                    ProgressMilestone::ProviderCallEnd,
                )
                .await;

            match outcome {
                Ok(Ok(result)) if result.confidence.is_finite() => return Ok(result),
                Ok(Ok(_invalid)) => {
                    last_err = Some(RuntimeError::ValidationFailed(
                        "agent result confidence was not finite".into(),
                    ));
                }
                Ok(Err(err)) => {
                    tracing::warn!(
                        incident_id = %incident_id,
                        agent_kind = ?chain.kind,
                        strategy_index = index,
                        error = %err,
                        "agent strategy failed, advancing fallback chain"
                    );
                    last_err = Some(err);
                }
                Err(_elapsed) => {
                    tracing::warn!(
                        incident_id = %incident_id,
                        agent_kind = ?chain.kind,
                        strategy_index = index,
                        soft_timeout = ?soft_timeout,
                        "agent strategy exceeded its soft timeout, advancing fallback chain"
                    );
                    last_err = Some(RuntimeError::Timeout(soft_timeout));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| RuntimeError::ChainExhausted("no strategies".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cadre_core::agent::{AgentStatus, ProposedAction};
    use cadre_core::time::DurationMs;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct AlwaysFails;

    #[async_trait]
    impl Agent for AlwaysFails {
        async fn run(&self, _input: AgentInput) -> Result<AgentResult, RuntimeError> {
            Err(RuntimeError::ValidationFailed("bad data".into()))
        }
    }

    struct Succeeds(f64);

    #[async_trait]
    impl Agent for Succeeds {
        async fn run(&self, input: AgentInput) -> Result<AgentResult, RuntimeError> {
            Ok(AgentResult {
                kind: input.kind,
                status: AgentStatus::Completed,
                confidence: self.0,
                reasoning: "ok".into(),
                evidence: vec![],
                providers_used: vec!["local".into()],
                duration: DurationMs::from_millis(5),
                proposed_action: Some(ProposedAction::new("scale_pool", "scale pool", input.kind)),
            })
        }
    }

    fn input(kind: AgentKind) -> AgentInput {
        AgentInput {
            run_id: AgentRunId::new(),
            incident_id: IncidentId::from("i1"),
            kind,
            missing_data: vec![],
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn advances_through_fallback_chain_on_failure() {
        let runtime = AgentRuntime::new(ObserverRegistry::new());
        let chain = FallbackChain::new(
            AgentKind::Detection,
            vec![Arc::new(AlwaysFails), Arc::new(Succeeds(0.9))],
        );
        let result = runtime
            .run(
                &IncidentId::from("i1"),
                &chain,
                input(AgentKind::Detection),
                &[],
            )
            .await
            .unwrap();
        assert_eq!(result.confidence, 0.9);
    }

    #[tokio::test]
    async fn exhausting_chain_is_an_error() {
        let runtime = AgentRuntime::new(ObserverRegistry::new());
        let chain = FallbackChain::new(AgentKind::Detection, vec![Arc::new(AlwaysFails)]);
        let result = runtime
            .run(
                &IncidentId::from("i1"),
                &chain,
                input(AgentKind::Detection),
                &[],
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_data_lowers_confidence_and_clamps() {
        let runtime = AgentRuntime::new(ObserverRegistry::new());
        let chain = FallbackChain::new(AgentKind::Detection, vec![Arc::new(Succeeds(0.1))]);
        let result = runtime
            .run(
                &IncidentId::from("i1"),
                &chain,
                input(AgentKind::Detection),
                &[MissingDataReason::Logs, MissingDataReason::Metrics],
            )
            .await
            .unwrap();
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn progress_observer_sees_start_and_terminal() {
        #[derive(Default)]
        struct Counter(AtomicU32);

        #[async_trait]
        impl ProgressObserver for Counter {
            async fn on_progress(
                &self,
                _incident_id: &IncidentId,
                _run_id: &AgentRunId,
                _kind: AgentKind,
                _milestone: ProgressMilestone,
            ) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counter = Arc::new(Counter::default());
        let mut observers = ObserverRegistry::new();
        observers.add(counter.clone());
        let runtime = AgentRuntime::new(observers);
        let chain = FallbackChain::new(AgentKind::Detection, vec![Arc::new(Succeeds(0.9))]);
        runtime
            .run(
                &IncidentId::from("i1"),
                &chain,
                input(AgentKind::Detection),
                &[],
            )
            .await
            .unwrap();
        assert!(counter.0.load(Ordering::SeqCst) >= 4);
    }
}
