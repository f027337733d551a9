//! In-process agent dispatcher for tests that need concurrent execution
//! without pulling in `cadre-runtime`'s timeout/fallback envelope.
//!
//! Grounded on `layer0::test_utils::local_orchestrator::LocalOrchestrator`:
//! a `HashMap` of registered handlers, dispatched concurrently via
//! `tokio::spawn`, with a `JoinError` mapped to a domain error rather than
//! propagated as a panic.

use crate::agent::{Agent, AgentInput, AgentKind, AgentResult};
use crate::error::RuntimeError;
use std::collections::HashMap;
use std::sync::Arc;

/// Dispatches `AgentInput`s to registered `Agent`s by kind, concurrently.
#[derive(Default)]
pub struct LocalAgentDispatcher {
    agents: HashMap<AgentKind, Arc<dyn Agent>>,
}

impl LocalAgentDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: AgentKind, agent: Arc<dyn Agent>) {
        self.agents.insert(kind, agent);
    }

    /// Runs every `(kind, input)` pair against its registered agent
    /// concurrently, returning one result per task in the input order.
    pub async fn dispatch_many(
        &self,
        tasks: Vec<(AgentKind, AgentInput)>,
    ) -> Vec<Result<AgentResult, RuntimeError>> {
        let mut handles = Vec::with_capacity(tasks.len());
        for (kind, input) in tasks {
            match self.agents.get(&kind) {
                Some(agent) => {
                    let agent = agent.clone();
                    handles.push(tokio::spawn(async move { agent.run(input).await }));
                }
                None => {
                    handles.push(tokio::spawn(async move {
                        Err(RuntimeError::ChainExhausted(format!(
                            "no agent registered for {kind:?}"
                        )))
                    }));
                }
            }
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(join_err) => results.push(Err(RuntimeError::ChainExhausted(format!(
                    "dispatch task panicked: {join_err}"
                )))),
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentStatus;
    use crate::id::{AgentRunId, IncidentId};
    use crate::time::DurationMs;
    use async_trait::async_trait;

    struct Fixed(f64);

    #[async_trait]
    impl Agent for Fixed {
        async fn run(&self, input: AgentInput) -> Result<AgentResult, RuntimeError> {
            Ok(AgentResult {
                kind: input.kind,
                status: AgentStatus::Completed,
                confidence: self.0,
                reasoning: "fixed".into(),
                evidence: vec![],
                providers_used: vec![],
                duration: DurationMs::from_millis(1),
                proposed_action: None,
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
    async fn dispatches_registered_agents_concurrently() {
        let mut dispatcher = LocalAgentDispatcher::new();
        dispatcher.register(AgentKind::Detection, Arc::new(Fixed(0.9)));
        dispatcher.register(AgentKind::Diagnosis, Arc::new(Fixed(0.5)));

        let results = dispatcher
            .dispatch_many(vec![
                (AgentKind::Detection, input(AgentKind::Detection)),
                (AgentKind::Diagnosis, input(AgentKind::Diagnosis)),
            ])
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().confidence, 0.9);
        assert_eq!(results[1].as_ref().unwrap().confidence, 0.5);
    }

    #[tokio::test]
    async fn missing_agent_reports_chain_exhausted() {
        let dispatcher = LocalAgentDispatcher::new();
        let results = dispatcher
            .dispatch_many(vec![(AgentKind::Resolution, input(AgentKind::Resolution))])
            .await;
        assert!(matches!(results[0], Err(RuntimeError::ChainExhausted(_))));
    }
}
