//! The public API surface (C11): a thin request/response layer over the
//! coordinator, event store, metrics service, and streaming bus
//! (SPEC_FULL.md §4.9).
//!
//! Grounded on `neuron-orch-kit`'s pattern of a facade type that owns no
//! business logic of its own, only validation plus delegation to the
//! components that do — every write endpoint here validates, assigns an
//! identifier, appends the opening event, and hands off; every read
//! endpoint sources from the event store or metrics service, never from
//! in-memory coordinator state, per §4.9's explicit "never from in-memory
//! coordinator state alone".

pub mod config;
pub mod demo;
pub mod logging;

pub use config::{Config, ConfigError};
pub use demo::DemoScenario;

use cadre_consensus::ConsensusEngine;
use cadre_coordinator::Coordinator;
use cadre_core::agent::AgentKind;
pub use cadre_core::error::ApiError;
use cadre_core::id::{IncidentId, SessionId};
use cadre_core::incident::{Incident, IncidentEvent, IncidentStatus, Severity};
use cadre_core::session::{ClientSession, ResumeFrom, SubscriptionFilter};
use cadre_core::time::{Clock, WallClockMs};
use cadre_metrics::{DataQuality, MetricsService, MetricsWatcher};
use cadre_runtime::{AgentRuntime, FallbackChain};
use cadre_store::EventStore;
use cadre_stream::{Bus, StreamEnvelope};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use tokio_util::sync::CancellationToken;

/// Request to submit a new incident (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitIncidentRequest {
    /// Caller-supplied identifier; generated when absent (§4.9).
    pub incident_id: Option<IncidentId>,
    pub kind: String,
    pub severity: Severity,
    pub submitting_actor: String,
    pub description: String,
    pub affected_services: Vec<String>,
}

/// Response to a submission: identifier and acceptance status (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitIncidentResponse {
    pub incident_id: IncidentId,
    pub accepted: bool,
}

/// Filters for the list-incidents query (§6.3: "secondary indexes by
/// status, severity, time range").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListIncidentsFilter {
    pub status: Option<IncidentStatus>,
    pub min_severity: Option<Severity>,
    pub since: Option<WallClockMs>,
}

impl ListIncidentsFilter {
    fn matches(&self, incident: &Incident) -> bool {
        if let Some(status) = self.status {
            if incident.status != status {
                return false;
            }
        }
        if let Some(min_severity) = self.min_severity {
            if incident.severity < min_severity {
                return false;
            }
        }
        if let Some(since) = self.since {
            if incident.submitted_at.as_millis() < since.as_millis() {
                return false;
            }
        }
        true
    }
}

/// Metrics query parameters (§6.1: `time_range`, `include_confidence`).
/// `time_range` is accepted for wire-compatibility; the metrics service's
/// own rolling windows (confidence window, success-rate window) already
/// bound what is reported, so no further filtering happens here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsQueryRequest {
    pub time_range_secs: Option<u64>,
    pub include_confidence: bool,
}

/// The object defined in §4.7, trimmed per `include_confidence`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsQueryResponse {
    pub mean_mttr_ms: Option<f64>,
    pub mttr_confidence_ms: Option<f64>,
    pub data_quality: String,
    pub prevention_count: u64,
    pub cost_saved: String,
    pub success_rate: f64,
    pub efficiency_score: f64,
}

/// Request to open a live stream (§6.2 connection lifecycle step 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenStreamRequest {
    pub client_id: String,
    pub dashboard_tag: String,
    #[serde(default)]
    pub filter: SubscriptionFilter,
    #[serde(default)]
    pub resume_from: Vec<ResumeFrom>,
}

/// Wires together the already-constructed components (C2, C7, C8, C9,
/// C10) that this facade delegates to. `cadre-api` builds none of the
/// business logic itself.
pub struct CadreApi {
    store: Arc<dyn EventStore>,
    coordinator: Arc<Coordinator>,
    metrics: Arc<MetricsService>,
    bus: Arc<Bus>,
    clock: Arc<dyn Clock>,
    demo_actor_tag: String,
    running: Arc<StdMutex<HashMap<IncidentId, CancellationToken>>>,
}

impl CadreApi {
    pub fn new(
        store: Arc<dyn EventStore>,
        coordinator: Arc<Coordinator>,
        metrics: Arc<MetricsService>,
        bus: Arc<Bus>,
        clock: Arc<dyn Clock>,
        demo_actor_tag: impl Into<String>,
    ) -> Self {
        Self {
            store,
            coordinator,
            metrics,
            bus,
            clock,
            demo_actor_tag: demo_actor_tag.into(),
            running: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Assembles the whole runtime from a loaded `Config`: breaker-backed
    /// rate limiting is left to the caller's `FallbackChain` wiring (agent
    /// strategies are domain-specific and supplied by the embedder), but
    /// every ambient tunable in `config` is threaded through C7, C8, C9,
    /// and C10's constructors.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn EventStore>,
        gateway: Arc<cadre_provider::ProviderGateway>,
        chains: HashMap<AgentKind, Arc<FallbackChain>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let runtime = Arc::new(AgentRuntime::new(cadre_runtime::ObserverRegistry::new()));
        let consensus = Arc::new(ConsensusEngine::new(gateway).with_threshold(config.consensus_threshold));
        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            runtime,
            consensus,
            chains,
            config.coordinator_config(),
        ));
        let metrics = Arc::new(MetricsService::new(config.metrics.to_metrics_config(), clock.clone()));
        let bus = Arc::new(Bus::new(store.clone(), clock.clone(), config.bus_config()));
        Self::new(store, coordinator, metrics, bus, clock, config.demo_actor_tag.clone())
    }

    fn validate_submission(req: &SubmitIncidentRequest) -> Result<(), ApiError> {
        if req.kind.trim().is_empty() {
            return Err(ApiError::Validation("incident kind must not be empty".into()));
        }
        if req.description.trim().is_empty() {
            return Err(ApiError::Validation("incident description must not be empty".into()));
        }
        if req.submitting_actor.trim().is_empty() {
            return Err(ApiError::Validation("submitting_actor must not be empty".into()));
        }
        Ok(())
    }

    /// Submits a new incident: validates, assigns an id if absent, appends
    /// `IncidentStarted`, then starts the coordinator run and its
    /// supporting relay/metrics-watch tasks in the background (§4.9).
    pub async fn submit_incident(
        &self,
        req: SubmitIncidentRequest,
    ) -> Result<SubmitIncidentResponse, ApiError> {
        Self::validate_submission(&req)?;
        let incident_id = req.incident_id.clone().unwrap_or_default();

        self.store
            .append(
                &incident_id,
                0,
                cadre_core::EventPayload::IncidentStarted {
                    kind: req.kind,
                    severity: req.severity,
                    submitting_actor: req.submitting_actor,
                    description: req.description,
                    affected_services: req.affected_services,
                },
            )
            .await?;

        self.spawn_incident_run(incident_id.clone());

        Ok(SubmitIncidentResponse {
            incident_id,
            accepted: true,
        })
    }

    /// Triggers one of the canned demo scenarios, restricted to
    /// `demo_actor_tag` (§6.1: "restricted to a designated actor tag").
    pub async fn trigger_demo(
        &self,
        actor_tag: &str,
        scenario: DemoScenario,
    ) -> Result<SubmitIncidentResponse, ApiError> {
        if actor_tag != self.demo_actor_tag {
            return Err(ApiError::Unauthorized(format!(
                "actor tag '{actor_tag}' is not permitted to trigger demo scenarios"
            )));
        }
        self.submit_incident(scenario.into_request()).await
    }

    /// Spawns the coordinator run plus two independent subscribers of its
    /// event stream: a relay that forwards every appended event into the
    /// bus for live dashboards, and a metrics watcher that records the
    /// terminal outcome. The store's `subscribe` supports multiple
    /// concurrent readers of the same log, so these run without
    /// coordinating with each other.
    fn spawn_incident_run(&self, incident_id: IncidentId) {
        let cancel = CancellationToken::new();
        self.running
            .lock()
            .expect("running-incident registry poisoned")
            .insert(incident_id.clone(), cancel.clone());

        let coordinator = self.coordinator.clone();
        let run_id = incident_id.clone();
        let run_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = coordinator.run_incident(run_id.clone(), run_cancel).await {
                tracing::error!(incident_id = %run_id, error = %err, "coordinator run failed");
            }
        });

        let store = self.store.clone();
        let bus = self.bus.clone();
        let relay_id = incident_id.clone();
        tokio::spawn(async move {
            let mut stream = store.subscribe(&relay_id, 0).await;
            while let Some(event) = stream.next().await {
                bus.publish_incident_event(event).await;
            }
        });

        let watcher = MetricsWatcher::new(self.metrics.clone(), self.store.clone());
        let bus = self.bus.clone();
        let watch_id = incident_id.clone();
        let running = self.running.clone();
        tokio::spawn(async move {
            if let Some(snapshot) = watcher.watch(watch_id.clone()).await {
                let quality = match snapshot.data_quality {
                    DataQuality::Normal => "normal",
                    DataQuality::Low => "low",
                };
                bus.publish_metrics(snapshot.mean_mttr_ms.map(|ms| ms.round() as u64), quality)
                    .await;
            }
            running.lock().expect("running-incident registry poisoned").remove(&watch_id);
        });
    }

    /// Requests cancellation of an in-flight incident run (§5: "every
    /// long-running operation accepts a cancellation signal").
    pub fn cancel_incident(&self, incident_id: &IncidentId) -> Result<(), ApiError> {
        match self
            .running
            .lock()
            .expect("running-incident registry poisoned")
            .get(incident_id)
        {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(ApiError::Validation(format!(
                "incident {incident_id} is not currently running"
            ))),
        }
    }

    /// Full replayable history for one incident (§6.1: "incident
    /// identifier → full replayable history").
    pub async fn get_incident_history(&self, incident_id: &IncidentId) -> Vec<IncidentEvent> {
        self.store.read(incident_id, 0).await
    }

    /// Current projected state for one incident (§6.1: "or current
    /// projected state").
    pub async fn get_incident(&self, incident_id: &IncidentId) -> Result<Incident, ApiError> {
        self.store
            .replay_state(incident_id)
            .await
            .ok_or_else(|| ApiError::Store(cadre_store::StoreError::IncidentNotFound(incident_id.clone())))
    }

    pub async fn list_incidents(&self, filter: &ListIncidentsFilter) -> Vec<Incident> {
        self.store
            .list_incidents()
            .await
            .into_iter()
            .filter(|incident| filter.matches(incident))
            .collect()
    }

    pub fn query_metrics(&self, req: MetricsQueryRequest) -> MetricsQueryResponse {
        let snapshot = self.metrics.snapshot();
        MetricsQueryResponse {
            mean_mttr_ms: snapshot.mean_mttr_ms,
            mttr_confidence_ms: if req.include_confidence {
                snapshot.mttr_confidence_ms
            } else {
                None
            },
            data_quality: snapshot.data_quality.as_str().to_string(),
            prevention_count: snapshot.prevention_count,
            cost_saved: snapshot.cost_saved.to_string(),
            success_rate: snapshot.success_rate,
            efficiency_score: snapshot.efficiency_score,
        }
    }

    /// Opens a live stream for a dashboard client (§6.2).
    pub async fn open_stream(
        &self,
        req: OpenStreamRequest,
    ) -> Result<(ClientSession, Pin<Box<dyn Stream<Item = StreamEnvelope> + Send>>), ApiError> {
        self.bus
            .connect(req.client_id, &req.dashboard_tag, req.filter, req.resume_from)
            .await
            .map_err(ApiError::from)
    }

    pub async fn close_stream(&self, session_id: &SessionId) {
        self.bus.disconnect(session_id).await;
    }

    pub fn now(&self) -> WallClockMs {
        self.clock.now_ms()
    }
}

// Deliberately no `impl Default for CadreApi`: `cadre-coordinator`'s
// scheduling requires at least two level 1|2 agents to reach consensus
// (`has_enough_core_agents`), so any facade built with no chains wired in
// is guaranteed to escalate every incident with no agent ever running.
// `from_config` forces the caller to supply real `FallbackChain`s.
