//! The business metrics service (C9): derives MTTR, cost, prevention, and
//! success-rate figures from the incident event log (SPEC_FULL.md §4.7).
//!
//! Grounded on `neuron-state-memory::MemoryStore`'s `RwLock`-guarded
//! in-memory aggregate for the locking shape, generalized here from a flat
//! key-value map to a capacity-bounded ring buffer of resolved-incident
//! samples plus a rolling time window of terminal outcomes. A plain
//! `std::sync::Mutex` is used in place of a `tokio::sync::RwLock` because
//! every operation here is pure in-memory arithmetic with no `.await`
//! inside the critical section.

use cadre_core::incident::EventPayload;
use cadre_core::time::{Clock, DurationMs, WallClockMs};
use cadre_core::{AgentKind, IncidentStatus, Severity};
use cadre_store::EventStore;
use futures::StreamExt;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Per-severity cost/baseline inputs and efficiency-score weighting
/// (SPEC_FULL.md §6.4: "baseline-cost/MTTR inputs for C9").
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Rolling sample count used for the MTTR confidence interval (§4.7,
    /// default 100).
    pub confidence_window: usize,
    /// Ring-buffer capacity retaining resolved-incident samples beyond the
    /// confidence window, for prevention count and cost saved (§4.7,
    /// default 1000).
    pub retention_capacity: usize,
    /// Rolling window for the success-rate calculation (§4.7, default 7
    /// days).
    pub success_rate_window: Duration,
    /// Dollars per minute of incident duration, indexed by
    /// `severity.get() - 1`.
    pub per_minute_cost: [Decimal; 5],
    /// Expected time-to-resolution without this system, indexed the same
    /// way, used as the MTTR baseline for cost-saved.
    pub baseline_mttr_ms: [u64; 5],
    /// Expected cost of an incident this system prevented outright.
    pub baseline_incident_cost: [Decimal; 5],
    /// Linear combination weights for the efficiency score, normalized to
    /// sum to 1.0 (§4.7).
    pub efficiency_weights: EfficiencyWeights,
}

/// Weighting of the four component metrics inside the efficiency score
/// (§4.7: "a configurable linear combination of the four metrics above").
#[derive(Debug, Clone, Copy)]
pub struct EfficiencyWeights {
    pub mttr: f64,
    pub prevention: f64,
    pub cost: f64,
    pub success_rate: f64,
}

impl Default for EfficiencyWeights {
    fn default() -> Self {
        Self {
            mttr: 0.3,
            prevention: 0.2,
            cost: 0.2,
            success_rate: 0.3,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            confidence_window: 100,
            retention_capacity: 1000,
            success_rate_window: Duration::from_secs(7 * 24 * 60 * 60),
            per_minute_cost: [Decimal::new(5, 1); 5],
            baseline_mttr_ms: [
                DurationMs::from_secs(15 * 60).as_millis(),
                DurationMs::from_secs(30 * 60).as_millis(),
                DurationMs::from_secs(60 * 60).as_millis(),
                DurationMs::from_secs(2 * 60 * 60).as_millis(),
                DurationMs::from_secs(4 * 60 * 60).as_millis(),
            ],
            baseline_incident_cost: [
                Decimal::new(100, 0),
                Decimal::new(500, 0),
                Decimal::new(2_000, 0),
                Decimal::new(10_000, 0),
                Decimal::new(50_000, 0),
            ],
            efficiency_weights: EfficiencyWeights::default(),
        }
    }
}

/// Data-quality flag attached to the MTTR figure (§4.7: "when N < 30, report
/// point estimate only and mark `data_quality = low`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataQuality {
    Normal,
    Low,
}

impl DataQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            DataQuality::Normal => "normal",
            DataQuality::Low => "low",
        }
    }
}

/// Full metrics object returned by a query (§4.7, §6.2's "metrics query").
/// Only `mean_mttr_ms` and `data_quality` are carried onto the wire as a
/// `MetricsRecomputed` event — the rest is queried on demand, never
/// replayed, so it never needs a stable schema of its own.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub mean_mttr_ms: Option<f64>,
    pub mttr_confidence_ms: Option<f64>,
    pub data_quality: DataQuality,
    pub prevention_count: u64,
    pub cost_saved: Decimal,
    pub success_rate: f64,
    pub efficiency_score: f64,
}

impl MetricsSnapshot {
    pub fn to_event(&self) -> EventPayload {
        EventPayload::MetricsRecomputed {
            mean_mttr_ms: self.mean_mttr_ms.map(|ms| ms.round() as u64),
            data_quality: self.data_quality.as_str().to_string(),
        }
    }
}

struct ResolvedSample {
    severity: Severity,
    mttr_ms: u64,
    preventive: bool,
}

struct MetricsState {
    resolved: VecDeque<ResolvedSample>,
    outcomes: VecDeque<(WallClockMs, IncidentStatus)>,
}

impl MetricsState {
    fn new() -> Self {
        Self {
            resolved: VecDeque::new(),
            outcomes: VecDeque::new(),
        }
    }
}

/// Aggregates incident outcomes into the metrics described in §4.7. Holds no
/// reference to any one incident; `MetricsWatcher` is what drives it from
/// the event store.
pub struct MetricsService {
    config: MetricsConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<MetricsState>,
}

impl MetricsService {
    pub fn new(config: MetricsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(MetricsState::new()),
        }
    }

    /// Records a resolved incident and returns the recomputed snapshot.
    pub fn record_resolution(&self, severity: Severity, mttr: DurationMs, preventive: bool) -> MetricsSnapshot {
        let mut state = self.state.lock().expect("metrics mutex poisoned");
        state.resolved.push_back(ResolvedSample {
            severity,
            mttr_ms: mttr.as_millis(),
            preventive,
        });
        while state.resolved.len() > self.config.retention_capacity {
            state.resolved.pop_front();
        }
        state
            .outcomes
            .push_back((self.clock.now_ms(), IncidentStatus::Resolved));
        self.recompute(&mut state)
    }

    pub fn record_escalation(&self) -> MetricsSnapshot {
        let mut state = self.state.lock().expect("metrics mutex poisoned");
        state
            .outcomes
            .push_back((self.clock.now_ms(), IncidentStatus::Escalated));
        self.recompute(&mut state)
    }

    pub fn record_failure(&self) -> MetricsSnapshot {
        let mut state = self.state.lock().expect("metrics mutex poisoned");
        state
            .outcomes
            .push_back((self.clock.now_ms(), IncidentStatus::Failed));
        self.recompute(&mut state)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut state = self.state.lock().expect("metrics mutex poisoned");
        self.recompute(&mut state)
    }

    fn recompute(&self, state: &mut MetricsState) -> MetricsSnapshot {
        let window_cutoff = self
            .clock
            .now_ms()
            .as_millis()
            .saturating_sub(self.config.success_rate_window.as_millis() as u64);
        while let Some((at, _)) = state.outcomes.front() {
            if at.as_millis() < window_cutoff {
                state.outcomes.pop_front();
            } else {
                break;
            }
        }

        let recent_mttrs: Vec<u64> = state
            .resolved
            .iter()
            .rev()
            .take(self.config.confidence_window)
            .map(|s| s.mttr_ms)
            .collect();
        let (mean_mttr_ms, mttr_confidence_ms, data_quality) = mean_with_confidence(&recent_mttrs);

        let prevention_count = state.resolved.iter().filter(|s| s.preventive).count() as u64;

        let cost_saved = state.resolved.iter().fold(Decimal::ZERO, |acc, sample| {
            let idx = (sample.severity.get() - 1) as usize;
            let baseline_ms = self.config.baseline_mttr_ms[idx];
            let delta_ms = baseline_ms as i64 - sample.mttr_ms as i64;
            let minutes = Decimal::from(delta_ms) / Decimal::from(60_000);
            let mut saved = minutes * self.config.per_minute_cost[idx];
            if sample.preventive {
                saved += self.config.baseline_incident_cost[idx];
            }
            acc + saved
        });

        let resolved_count = state
            .outcomes
            .iter()
            .filter(|(_, status)| *status == IncidentStatus::Resolved)
            .count();
        let total = state.outcomes.len();
        let success_rate = if total == 0 {
            1.0
        } else {
            resolved_count as f64 / total as f64
        };

        let efficiency_score = efficiency_score(
            &self.config.efficiency_weights,
            mean_mttr_ms,
            prevention_count,
            cost_saved,
            success_rate,
        );

        MetricsSnapshot {
            mean_mttr_ms,
            mttr_confidence_ms,
            data_quality,
            prevention_count,
            cost_saved,
            success_rate,
            efficiency_score,
        }
    }
}

/// Mean with a 95% confidence half-width via the normal approximation
/// `1.96 × stddev/√N` (§4.7). Below 30 samples, only the point estimate is
/// reported and `data_quality` is marked `low`.
fn mean_with_confidence(samples: &[u64]) -> (Option<f64>, Option<f64>, DataQuality) {
    let n = samples.len();
    if n == 0 {
        return (None, None, DataQuality::Low);
    }
    let mean = samples.iter().sum::<u64>() as f64 / n as f64;
    if n < 30 {
        return (Some(mean), None, DataQuality::Low);
    }
    let variance = samples
        .iter()
        .map(|&x| {
            let d = x as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n as f64;
    let stddev = variance.sqrt();
    let half_width = 1.96 * stddev / (n as f64).sqrt();
    (Some(mean), Some(half_width), DataQuality::Normal)
}

/// Normalizes each component metric to roughly [0,1] and combines them per
/// the configured weights (§4.7). MTTR contributes inversely: a lower MTTR
/// scores higher, clamped against a one-hour reference point.
fn efficiency_score(
    weights: &EfficiencyWeights,
    mean_mttr_ms: Option<f64>,
    prevention_count: u64,
    cost_saved: Decimal,
    success_rate: f64,
) -> f64 {
    let mttr_component = match mean_mttr_ms {
        Some(ms) => (1.0 - ms / DurationMs::from_secs(3600).as_millis() as f64).clamp(0.0, 1.0),
        None => 0.0,
    };
    let prevention_component = (prevention_count as f64 / 10.0).clamp(0.0, 1.0);
    let cost_component = (cost_saved.to_f64().unwrap_or(0.0) / 10_000.0).clamp(0.0, 1.0);

    let total_weight =
        weights.mttr + weights.prevention + weights.cost + weights.success_rate;
    if total_weight <= 0.0 {
        return 0.0;
    }

    (weights.mttr * mttr_component
        + weights.prevention * prevention_component
        + weights.cost * cost_component
        + weights.success_rate * success_rate.clamp(0.0, 1.0))
        / total_weight
}

/// Drives a `MetricsService` from one incident's terminal outcome, replaying
/// its log far enough to learn whether the resolution was preventive
/// (§4.7). The only caller of `EventStore`, keeping C9's dependency on C2
/// read-only.
pub struct MetricsWatcher {
    service: Arc<MetricsService>,
    store: Arc<dyn EventStore>,
}

impl MetricsWatcher {
    pub fn new(service: Arc<MetricsService>, store: Arc<dyn EventStore>) -> Self {
        Self { service, store }
    }

    /// Watches one incident to its terminal event and records the outcome.
    /// Returns `None` if the stream ends without a terminal event (the
    /// incident was still active when the caller gave up).
    pub async fn watch(&self, incident_id: cadre_core::IncidentId) -> Option<MetricsSnapshot> {
        let mut started_at = None;
        let mut severity = None;
        let mut preventive = false;

        let mut stream = self.store.subscribe(&incident_id, 0).await;
        while let Some(event) = stream.next().await {
            match &event.payload {
                EventPayload::IncidentStarted { severity: sev, .. } => {
                    started_at = Some(event.timestamp);
                    severity = Some(*sev);
                }
                EventPayload::AgentCompleted {
                    agent_kind: AgentKind::Resolution,
                    result,
                } => {
                    preventive = result
                        .proposed_action
                        .as_ref()
                        .map(|a| a.is_preventive())
                        .unwrap_or(false);
                }
                EventPayload::ResolutionComplete { .. } => {
                    let (Some(started), Some(severity)) = (started_at, severity) else {
                        return None;
                    };
                    let mttr = event.timestamp.saturating_sub(started);
                    tracing::debug!(incident_id = %incident_id, mttr_ms = mttr.as_millis(), preventive, "recording resolved incident");
                    return Some(self.service.record_resolution(severity, mttr, preventive));
                }
                EventPayload::Escalated { .. } => {
                    tracing::debug!(incident_id = %incident_id, "recording escalated incident");
                    return Some(self.service.record_escalation());
                }
                EventPayload::Failed { .. } => {
                    tracing::debug!(incident_id = %incident_id, "recording failed incident");
                    return Some(self.service.record_failure());
                }
                _ => {}
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadre_core::time::FixedClock;
    use cadre_core::EventPayload as Payload;
    use cadre_core::{AgentKind, AgentResult, AgentStatus, ProposedAction};
    use cadre_store::InMemoryEventStore;

    fn service(clock: Arc<dyn Clock>) -> MetricsService {
        MetricsService::new(MetricsConfig::default(), clock)
    }

    #[test]
    fn below_thirty_samples_reports_point_estimate_only() {
        let svc = service(Arc::new(FixedClock::at(0)));
        let snapshot = svc.record_resolution(Severity::new(2), DurationMs::from_secs(600), false);
        assert!(snapshot.mean_mttr_ms.is_some());
        assert!(snapshot.mttr_confidence_ms.is_none());
        assert_eq!(snapshot.data_quality, DataQuality::Low);
    }

    #[test]
    fn thirty_or_more_samples_reports_confidence_interval() {
        let svc = service(Arc::new(FixedClock::at(0)));
        for _ in 0..30 {
            svc.record_resolution(Severity::new(2), DurationMs::from_secs(600), false);
        }
        let snapshot = svc.snapshot();
        assert_eq!(snapshot.data_quality, DataQuality::Normal);
        assert!(snapshot.mttr_confidence_ms.unwrap() >= 0.0);
        assert!((snapshot.mean_mttr_ms.unwrap() - 600_000.0).abs() < 1e-6);
    }

    #[test]
    fn prevention_count_tracks_tagged_actions() {
        let svc = service(Arc::new(FixedClock::at(0)));
        svc.record_resolution(Severity::new(3), DurationMs::from_secs(300), true);
        svc.record_resolution(Severity::new(3), DurationMs::from_secs(300), false);
        let snapshot = svc.snapshot();
        assert_eq!(snapshot.prevention_count, 1);
    }

    #[test]
    fn success_rate_reflects_outcome_mix() {
        let svc = service(Arc::new(FixedClock::at(0)));
        svc.record_resolution(Severity::new(2), DurationMs::from_secs(300), false);
        svc.record_escalation();
        let snapshot = svc.snapshot();
        assert!((snapshot.success_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn success_rate_window_prunes_old_outcomes() {
        let clock = Arc::new(FixedClock::at(0));
        let svc = service(clock.clone());
        svc.record_escalation();
        clock.advance(DurationMs::from_secs(8 * 24 * 60 * 60));
        svc.record_resolution(Severity::new(2), DurationMs::from_secs(300), false);
        let snapshot = svc.snapshot();
        assert!((snapshot.success_rate - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn watcher_derives_mttr_from_incident_log() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::at(0));
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new(clock.clone()));
        let service = Arc::new(MetricsService::new(MetricsConfig::default(), clock.clone()));
        let watcher = MetricsWatcher::new(service.clone(), store.clone());

        let incident_id = cadre_core::IncidentId::from("i1");
        store
            .append(
                &incident_id,
                0,
                Payload::IncidentStarted {
                    kind: "db_cascade".into(),
                    severity: Severity::new(3),
                    submitting_actor: "alertmanager".into(),
                    description: "db pool exhausted".into(),
                    affected_services: vec!["orders".into()],
                },
            )
            .await
            .unwrap();
        store
            .append(
                &incident_id,
                1,
                Payload::AgentCompleted {
                    agent_kind: AgentKind::Resolution,
                    result: AgentResult {
                        kind: AgentKind::Resolution,
                        status: AgentStatus::Completed,
                        confidence: 0.9,
                        reasoning: "scale it".into(),
                        evidence: vec![],
                        providers_used: vec![],
                        duration: DurationMs::from_millis(5),
                        proposed_action: Some(ProposedAction::new(
                            "scale_pool:preventive",
                            "scale pool",
                            AgentKind::Resolution,
                        )),
                    },
                },
            )
            .await
            .unwrap();
        store
            .append(
                &incident_id,
                2,
                Payload::ResolutionComplete {
                    action_id: "scale_pool".into(),
                },
            )
            .await
            .unwrap();

        let snapshot = watcher.watch(incident_id).await.unwrap();
        assert_eq!(snapshot.prevention_count, 1);
        assert!(snapshot.mean_mttr_ms.unwrap() >= 0.0);
    }
}
