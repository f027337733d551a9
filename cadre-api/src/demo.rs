//! Canned demo scenarios (SPEC_FULL.md §6.1: "names a closed set of canned
//! scenarios; restricted to a designated actor tag").

use cadre_core::incident::Severity;
use serde::{Deserialize, Serialize};

use crate::SubmitIncidentRequest;

/// The closed set of demo incidents an operator can inject to exercise a
/// dashboard without waiting for a real page.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemoScenario {
    DatabaseCascadeFailure,
    ApiLatencySpike,
    CertificateExpiry,
}

impl DemoScenario {
    pub fn into_request(self) -> SubmitIncidentRequest {
        let (kind, severity, description, services): (&str, u8, &str, &[&str]) = match self {
            DemoScenario::DatabaseCascadeFailure => (
                "db_cascade",
                4,
                "primary database connection pool exhausted, cascading to dependent services",
                &["orders", "checkout", "inventory"],
            ),
            DemoScenario::ApiLatencySpike => (
                "latency_spike",
                2,
                "p99 latency on the public API exceeded SLO for 5 consecutive minutes",
                &["public-api"],
            ),
            DemoScenario::CertificateExpiry => (
                "cert_expiry",
                3,
                "TLS certificate for an internal service mesh endpoint expires within 24 hours",
                &["service-mesh"],
            ),
        };
        SubmitIncidentRequest {
            incident_id: None,
            kind: kind.to_string(),
            severity: Severity::new(severity),
            submitting_actor: "demo".to_string(),
            description: description.to_string(),
            affected_services: services.iter().map(|s| s.to_string()).collect(),
        }
    }
}
