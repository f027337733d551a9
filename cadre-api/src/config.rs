//! The ambient configuration layer (SPEC_FULL.md §10.2): a single `Config`
//! loaded from TOML, with explicit-path / `CADRE_CONFIG` / XDG-default /
//! built-in-default resolution and `CADRE_`-prefixed environment overrides.
//!
//! Grounded on `agtrace-runtime::config`'s `resolve_workspace_path` (explicit
//! argument, then an env var, then `dirs::data_dir()`, then a tilde-expanded
//! fallback) and its `Config::load`/`load_from`/`save`/`save_to` shape,
//! generalized from a provider-credentials file to the full set of tunables
//! enumerated in SPEC_FULL.md §6.4.

use cadre_breaker::limiter::RateLimitConfig;
use cadre_breaker::BreakerConfig;
use cadre_coordinator::CoordinatorConfig;
use cadre_metrics::{EfficiencyWeights, MetricsConfig};
use cadre_stream::BusConfig;
pub use cadre_core::error::ErrorKind;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Raised when a config file exists but cannot be parsed (§10.2: "loading a
/// malformed file is a startup-time `ValidationError`").
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ValidationError
    }
}

fn default_queue_capacity() -> usize {
    256
}
fn default_heartbeat_interval_secs() -> u64 {
    20
}
fn default_max_concurrent_incidents() -> usize {
    50
}
fn default_provider_concurrency() -> usize {
    16
}
fn default_coordinator_deadline_secs() -> u64 {
    12 * 60
}
fn default_cancellation_grace_secs() -> u64 {
    2
}
fn default_demo_actor_tag() -> String {
    "demo_operator".to_string()
}
fn default_consensus_threshold() -> f64 {
    cadre_consensus::DEFAULT_THRESHOLD
}

/// Circuit-breaker tunables (§4.2, §6.4 defaults: threshold 5, cooldown
/// 30s, half-open success count 2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub half_open_success_threshold: u32,
    pub call_timeout_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let d = BreakerConfig::default();
        Self {
            failure_threshold: d.failure_threshold,
            cooldown_secs: d.cooldown.as_secs(),
            half_open_success_threshold: d.half_open_success_threshold,
            call_timeout_secs: d.call_timeout.as_secs(),
        }
    }
}

impl BreakerSettings {
    pub fn to_breaker_config(self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
            half_open_success_threshold: self.half_open_success_threshold,
            call_timeout: Duration::from_secs(self.call_timeout_secs),
        }
    }
}

/// One outbound destination's token-bucket limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitEntry {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

impl From<RateLimitConfig> for RateLimitEntry {
    fn from(c: RateLimitConfig) -> Self {
        Self {
            capacity: c.capacity,
            refill_per_sec: c.refill_per_sec,
        }
    }
}

impl RateLimitEntry {
    pub fn to_rate_limit_config(self) -> RateLimitConfig {
        RateLimitConfig {
            capacity: self.capacity,
            refill_per_sec: self.refill_per_sec,
        }
    }
}

/// Outbound rate limits by channel (§4.2, §6.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub chat: RateLimitEntry,
    pub pager: RateLimitEntry,
    pub email: RateLimitEntry,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            chat: RateLimitConfig::CHAT.into(),
            pager: RateLimitConfig::PAGER.into(),
            email: RateLimitConfig::EMAIL.into(),
        }
    }
}

/// Baseline-cost/MTTR inputs and efficiency weighting for C9 (§4.7, §6.4),
/// indexed by `severity.get() - 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub confidence_window: usize,
    pub retention_capacity: usize,
    pub success_rate_window_secs: u64,
    pub per_minute_cost: [f64; 5],
    pub baseline_mttr_secs: [u64; 5],
    pub baseline_incident_cost: [f64; 5],
    pub efficiency_weight_mttr: f64,
    pub efficiency_weight_prevention: f64,
    pub efficiency_weight_cost: f64,
    pub efficiency_weight_success_rate: f64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        let d = MetricsConfig::default();
        Self {
            confidence_window: d.confidence_window,
            retention_capacity: d.retention_capacity,
            success_rate_window_secs: d.success_rate_window.as_secs(),
            per_minute_cost: d.per_minute_cost.map(|v| v.to_string().parse().unwrap_or(0.5)),
            baseline_mttr_secs: d.baseline_mttr_ms.map(|ms| ms / 1000),
            baseline_incident_cost: d
                .baseline_incident_cost
                .map(|v| v.to_string().parse().unwrap_or(0.0)),
            efficiency_weight_mttr: d.efficiency_weights.mttr,
            efficiency_weight_prevention: d.efficiency_weights.prevention,
            efficiency_weight_cost: d.efficiency_weights.cost,
            efficiency_weight_success_rate: d.efficiency_weights.success_rate,
        }
    }
}

impl MetricsSettings {
    pub fn to_metrics_config(&self) -> MetricsConfig {
        let decimal = |v: f64| Decimal::from_f64(v).unwrap_or_default();
        MetricsConfig {
            confidence_window: self.confidence_window,
            retention_capacity: self.retention_capacity,
            success_rate_window: Duration::from_secs(self.success_rate_window_secs),
            per_minute_cost: self.per_minute_cost.map(decimal),
            baseline_mttr_ms: self.baseline_mttr_secs.map(|s| s * 1000),
            baseline_incident_cost: self.baseline_incident_cost.map(decimal),
            efficiency_weights: EfficiencyWeights {
                mttr: self.efficiency_weight_mttr,
                prevention: self.efficiency_weight_prevention,
                cost: self.efficiency_weight_cost,
                success_rate: self.efficiency_weight_success_rate,
            },
        }
    }
}

/// Every recognized configuration option enumerated in SPEC_FULL.md §6.4.
///
/// `cadre_core::AgentKind`'s `canonical_weight`/`timeout_budget_secs` are
/// fixed consts, not configurable: per-kind weight and timeout overrides are
/// not implemented (see DESIGN.md's Open Question decisions), so this
/// surface does not expose fields for them rather than accepting and
/// silently dropping values an operator might set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub consensus_threshold: f64,
    pub breaker: BreakerSettings,
    pub rate_limits: RateLimitSettings,
    pub provider_routing: BTreeMap<String, String>,
    pub queue_capacity: usize,
    pub heartbeat_interval_secs: u64,
    pub max_concurrent_incidents: usize,
    pub provider_concurrency: usize,
    pub coordinator_deadline_secs: u64,
    pub cancellation_grace_secs: u64,
    pub metrics: MetricsSettings,
    pub demo_actor_tag: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            consensus_threshold: default_consensus_threshold(),
            breaker: BreakerSettings::default(),
            rate_limits: RateLimitSettings::default(),
            provider_routing: BTreeMap::new(),
            queue_capacity: default_queue_capacity(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            max_concurrent_incidents: default_max_concurrent_incidents(),
            provider_concurrency: default_provider_concurrency(),
            coordinator_deadline_secs: default_coordinator_deadline_secs(),
            cancellation_grace_secs: default_cancellation_grace_secs(),
            metrics: MetricsSettings::default(),
            demo_actor_tag: default_demo_actor_tag(),
        }
    }
}

impl Config {
    /// Resolves the config file path: explicit argument, then
    /// `CADRE_CONFIG`, then an XDG-style data directory, then a
    /// tilde-expanded fallback (§10.2).
    pub fn resolve_path(explicit_path: Option<&str>) -> PathBuf {
        if let Some(p) = explicit_path {
            return expand_tilde(p);
        }
        if let Ok(p) = std::env::var("CADRE_CONFIG") {
            return expand_tilde(&p);
        }
        if let Some(dir) = dirs::data_dir() {
            return dir.join("cadre").join("config.toml");
        }
        expand_tilde("~/.cadre/config.toml")
    }

    /// Loads from the resolved default path; a missing file yields the
    /// built-in default rather than an error (§10.2).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::resolve_path(None))
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if !path.exists() {
            Self::default()
        } else {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let text = toml::to_string_pretty(self).expect("Config always serializes");
        std::fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies `CADRE_`-prefixed environment overrides on top of whatever
    /// was loaded from file or defaulted (§10.2: "operational convenience").
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parsed("CADRE_CONSENSUS_THRESHOLD") {
            self.consensus_threshold = v;
        }
        if let Some(v) = env_parsed("CADRE_QUEUE_CAPACITY") {
            self.queue_capacity = v;
        }
        if let Some(v) = env_parsed("CADRE_HEARTBEAT_INTERVAL_SECS") {
            self.heartbeat_interval_secs = v;
        }
        if let Some(v) = env_parsed("CADRE_MAX_CONCURRENT_INCIDENTS") {
            self.max_concurrent_incidents = v;
        }
        if let Some(v) = env_parsed("CADRE_PROVIDER_CONCURRENCY") {
            self.provider_concurrency = v;
        }
        if let Some(v) = env_parsed("CADRE_COORDINATOR_DEADLINE_SECS") {
            self.coordinator_deadline_secs = v;
        }
        if let Ok(v) = std::env::var("CADRE_DEMO_ACTOR_TAG") {
            self.demo_actor_tag = v;
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            deadline: Duration::from_secs(self.coordinator_deadline_secs),
            max_concurrent_incidents: self.max_concurrent_incidents,
            cancellation_grace: Duration::from_secs(self.cancellation_grace_secs),
        }
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            queue_capacity: self.queue_capacity,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn expand_tilde(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}
