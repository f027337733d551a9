//! The event store (C2): an append-only, per-incident ordered log with
//! optimistic concurrency and replay.
//!
//! Grounded on `neuron-state-memory`'s `RwLock<HashMap<..>>`-backed store
//! for the locking shape, generalized from a flat key-value map to a
//! per-incident ordered event vector plus a `tokio::sync::broadcast` channel
//! per incident for live `subscribe` fan-out.

use async_trait::async_trait;
use cadre_core::{Clock, IncidentEvent, SystemClock};
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

pub use cadre_core::StoreError;

const BROADCAST_CAPACITY: usize = 1024;

/// Operations on the per-incident event log (SPEC_FULL.md §4.1).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends `payload` as the next event, failing with `VersionConflict`
    /// if `expected_version` does not match the current head, or
    /// `IncidentTerminated` if the incident already reached a terminal
    /// event.
    async fn append(
        &self,
        incident_id: &cadre_core::IncidentId,
        expected_version: u64,
        payload: cadre_core::EventPayload,
    ) -> Result<IncidentEvent, StoreError>;

    /// Current head version, or 0 if the incident is unknown.
    async fn head_version(&self, incident_id: &cadre_core::IncidentId) -> u64;

    /// Finite ordered sequence of events with version ≥ `from_version`.
    /// Returns empty (not an error) when `from_version` exceeds head.
    async fn read(
        &self,
        incident_id: &cadre_core::IncidentId,
        from_version: u64,
    ) -> Vec<IncidentEvent>;

    /// A lazy sequence that emits historical events from `from_version`,
    /// then live events as they are appended, terminated by either the
    /// terminal event or subscriber drop.
    async fn subscribe(
        &self,
        incident_id: &cadre_core::IncidentId,
        from_version: u64,
    ) -> Pin<Box<dyn Stream<Item = IncidentEvent> + Send>>;

    /// Derived snapshot obtained by applying all events in order.
    async fn replay_state(
        &self,
        incident_id: &cadre_core::IncidentId,
    ) -> Option<cadre_core::Incident>;

    /// Every incident the store has ever seen, projected to its current
    /// state (SPEC_FULL.md §6.3: "secondary indexes by status, severity,
    /// time range"). Callers filter in memory; the store itself keeps no
    /// separate index, consistent with its non-goal of durable storage.
    async fn list_incidents(&self) -> Vec<cadre_core::Incident>;
}

struct IncidentLog {
    events: Vec<IncidentEvent>,
    terminal: bool,
    tx: broadcast::Sender<IncidentEvent>,
}

impl IncidentLog {
    fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            events: Vec::new(),
            terminal: false,
            tx,
        }
    }

    fn head_version(&self) -> u64 {
        self.events.last().map(|e| e.version).unwrap_or(0)
    }
}

/// Reference in-process event store. Matches the "durable message replay
/// across process restarts" non-goal in SPEC_FULL.md §1: nothing here
/// survives past the process.
pub struct InMemoryEventStore {
    clock: Arc<dyn Clock>,
    logs: RwLock<HashMap<cadre_core::IncidentId, Arc<Mutex<IncidentLog>>>>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryEventStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            logs: RwLock::new(HashMap::new()),
        }
    }

    async fn log_for(&self, incident_id: &cadre_core::IncidentId) -> Arc<Mutex<IncidentLog>> {
        if let Some(log) = self.logs.read().await.get(incident_id) {
            return log.clone();
        }
        let mut logs = self.logs.write().await;
        logs.entry(incident_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(IncidentLog::new())))
            .clone()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        incident_id: &cadre_core::IncidentId,
        expected_version: u64,
        payload: cadre_core::EventPayload,
    ) -> Result<IncidentEvent, StoreError> {
        let log = self.log_for(incident_id).await;
        let mut log = log.lock().await;

        if log.terminal {
            return Err(StoreError::IncidentTerminated(incident_id.clone()));
        }

        let head = log.head_version();
        if head != expected_version {
            return Err(StoreError::VersionConflict {
                incident_id: incident_id.clone(),
                expected: expected_version,
                head,
            });
        }

        let is_terminal = payload.is_terminal();
        let event = IncidentEvent::new(
            incident_id.clone(),
            head + 1,
            self.clock.now_ms(),
            payload,
        );

        log.events.push(event.clone());
        log.terminal = is_terminal;
        // No receivers is not an error: fan-out is best-effort (§7).
        let _ = log.tx.send(event.clone());

        tracing::debug!(
            incident_id = %incident_id,
            version = event.version,
            kind = event.payload.kind_name(),
            "appended incident event"
        );

        Ok(event)
    }

    async fn head_version(&self, incident_id: &cadre_core::IncidentId) -> u64 {
        let logs = self.logs.read().await;
        match logs.get(incident_id) {
            Some(log) => log.lock().await.head_version(),
            None => 0,
        }
    }

    async fn read(
        &self,
        incident_id: &cadre_core::IncidentId,
        from_version: u64,
    ) -> Vec<IncidentEvent> {
        let logs = self.logs.read().await;
        match logs.get(incident_id) {
            Some(log) => {
                let log = log.lock().await;
                log.events
                    .iter()
                    .filter(|e| e.version >= from_version)
                    .cloned()
                    .collect()
            }
            None => Vec::new(),
        }
    }

    async fn subscribe(
        &self,
        incident_id: &cadre_core::IncidentId,
        from_version: u64,
    ) -> Pin<Box<dyn Stream<Item = IncidentEvent> + Send>> {
        let log = self.log_for(incident_id).await;
        let (historical, rx, already_terminal) = {
            let log = log.lock().await;
            let historical: Vec<IncidentEvent> = log
                .events
                .iter()
                .filter(|e| e.version >= from_version)
                .cloned()
                .collect();
            (historical, log.tx.subscribe(), log.terminal)
        };

        let last_sent = historical.last().map(|e| e.version).unwrap_or(0).max(from_version.saturating_sub(1));
        let live = BroadcastStream::new(rx).filter_map(move |item| item.ok());

        let stream = async_stream::stream! {
            let mut watermark = last_sent;
            for event in historical {
                watermark = event.version;
                let terminal = event.payload.is_terminal();
                yield event;
                if terminal {
                    return;
                }
            }
            if already_terminal {
                return;
            }
            tokio::pin!(live);
            while let Some(event) = live.next().await {
                if event.version <= watermark {
                    continue;
                }
                watermark = event.version;
                let terminal = event.payload.is_terminal();
                yield event;
                if terminal {
                    return;
                }
            }
        };

        Box::pin(stream)
    }

    async fn replay_state(
        &self,
        incident_id: &cadre_core::IncidentId,
    ) -> Option<cadre_core::Incident> {
        let events = self.read(incident_id, 0).await;
        cadre_core::replay(&events)
    }

    async fn list_incidents(&self) -> Vec<cadre_core::Incident> {
        let ids: Vec<cadre_core::IncidentId> = self.logs.read().await.keys().cloned().collect();
        let mut incidents = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(incident) = self.replay_state(&id).await {
                incidents.push(incident);
            }
        }
        incidents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadre_core::{EventPayload, IncidentId, Severity};

    fn started() -> EventPayload {
        EventPayload::IncidentStarted {
            kind: "db_cascade".into(),
            severity: Severity::new(4),
            submitting_actor: "alertmanager".into(),
            description: "db pool exhausted".into(),
            affected_services: vec!["orders".into()],
        }
    }

    #[tokio::test]
    async fn append_assigns_contiguous_versions() {
        let store = InMemoryEventStore::default();
        let id = IncidentId::from("i1");
        let e1 = store.append(&id, 0, started()).await.unwrap();
        assert_eq!(e1.version, 1);
        let e2 = store
            .append(
                &id,
                1,
                EventPayload::AgentAssigned {
                    agent_kind: cadre_core::AgentKind::Detection,
                },
            )
            .await
            .unwrap();
        assert_eq!(e2.version, 2);
        assert_eq!(store.head_version(&id).await, 2);
    }

    #[tokio::test]
    async fn stale_expected_version_conflicts() {
        let store = InMemoryEventStore::default();
        let id = IncidentId::from("i1");
        store.append(&id, 0, started()).await.unwrap();
        let err = store.append(&id, 0, started()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.kind(), cadre_core::ErrorKind::VersionConflict);
    }

    #[tokio::test]
    async fn append_after_terminal_is_rejected() {
        let store = InMemoryEventStore::default();
        let id = IncidentId::from("i1");
        store.append(&id, 0, started()).await.unwrap();
        store
            .append(
                &id,
                1,
                EventPayload::ResolutionComplete {
                    action_id: "scale_pool".into(),
                },
            )
            .await
            .unwrap();
        let err = store
            .append(
                &id,
                2,
                EventPayload::AgentAssigned {
                    agent_kind: cadre_core::AgentKind::Detection,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), cadre_core::ErrorKind::IncidentTerminated);
    }

    #[tokio::test]
    async fn read_past_head_returns_empty() {
        let store = InMemoryEventStore::default();
        let id = IncidentId::from("i1");
        store.append(&id, 0, started()).await.unwrap();
        assert!(store.read(&id, 50).await.is_empty());
    }

    #[tokio::test]
    async fn subscribe_replays_history_then_live_events() {
        let store = InMemoryEventStore::default();
        let id = IncidentId::from("i1");
        store.append(&id, 0, started()).await.unwrap();

        let mut stream = store.subscribe(&id, 0).await;
        let first = futures::StreamExt::next(&mut stream).await.unwrap();
        assert_eq!(first.version, 1);

        store
            .append(
                &id,
                1,
                EventPayload::ResolutionComplete {
                    action_id: "scale_pool".into(),
                },
            )
            .await
            .unwrap();

        let second = futures::StreamExt::next(&mut stream).await.unwrap();
        assert_eq!(second.version, 2);
        assert!(futures::StreamExt::next(&mut stream).await.is_none(), "stream ends at terminal event");
    }

    #[tokio::test]
    async fn list_incidents_returns_every_projection() {
        let store = InMemoryEventStore::default();
        let a = IncidentId::from("i1");
        let b = IncidentId::from("i2");
        store.append(&a, 0, started()).await.unwrap();
        store.append(&b, 0, started()).await.unwrap();
        let mut ids: Vec<_> = store
            .list_incidents()
            .await
            .into_iter()
            .map(|i| i.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec![a, b]);
    }

    #[tokio::test]
    async fn replay_state_reconstructs_projection() {
        let store = InMemoryEventStore::default();
        let id = IncidentId::from("i1");
        store.append(&id, 0, started()).await.unwrap();
        let incident = store.replay_state(&id).await.unwrap();
        assert_eq!(incident.id, id);
        assert_eq!(incident.severity.get(), 4);
    }
}
