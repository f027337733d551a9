//! The provider gateway (C4): a uniform interface to external inference and
//! knowledge effectors with usage metering (SPEC_FULL.md §4.3).
//!
//! Grounded on `layer0::operator`'s usage-shape (`OperatorMetadata`'s
//! cost/token accounting) and on `neuron-turn::provider`'s `ProviderError`
//! design (its `is_retryable()` predicate — pattern reused, file not
//! carried, since that crate is tied to LLM message content this domain
//! does not have); cost accounting follows `neuron-provider-anthropic`'s
//! `Decimal`-based per-unit cost calculation.

pub mod local;

use async_trait::async_trait;
pub use cadre_core::error::ProviderError;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Task class a routing hint may target (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskClass {
    Fast,
    Standard,
    Heavy,
}

/// Caller-supplied routing preference.
#[derive(Debug, Clone, Default)]
pub struct RoutingHint {
    pub provider: Option<String>,
    pub task_class: Option<TaskClass>,
}

/// Usage metering returned by every capability call, aggregated by the
/// gateway into per-provider counters exposed to C9/C10 (§4.3).
#[derive(Debug, Clone)]
pub struct Usage {
    pub provider: String,
    pub duration: Duration,
    pub units: u64,
    pub cost: Decimal,
}

/// Outcome of a safety check (§4.3). A `Block` converts the caller's
/// operation into a `SafetyViolation` failure.
#[derive(Debug, Clone)]
pub enum SafetyVerdict {
    Allow,
    Block { reason: String },
}

/// A knowledge snippet with citation, returned by `knowledge_query`.
pub use cadre_core::rag::KnowledgeSnippet;

/// The uniform capability set every provider implements (§4.3). Providers
/// are pluggable and must advertise a `health` endpoint; unhealthy providers
/// are skipped by the router.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Cheapest task class this provider can serve; the router treats a
    /// provider as a candidate for a requested class only if this covers it.
    fn task_class(&self) -> TaskClass;

    fn cost_per_unit(&self) -> Decimal;

    async fn health(&self) -> bool;

    async fn generate_text(&self, prompt: &str) -> Result<(String, Usage), ProviderError>;

    async fn embed(&self, text: &str) -> Result<(Vec<f32>, Usage), ProviderError>;

    async fn knowledge_query(
        &self,
        query: &str,
    ) -> Result<(Vec<KnowledgeSnippet>, Usage), ProviderError>;

    async fn safety_check(&self, text: &str) -> Result<SafetyVerdict, ProviderError>;

    async fn invoke_named_action(
        &self,
        name: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<Value, ProviderError>;
}

fn class_rank(class: TaskClass) -> u8 {
    match class {
        TaskClass::Fast => 0,
        TaskClass::Standard => 1,
        TaskClass::Heavy => 2,
    }
}

/// Routes capability calls across registered providers, aggregating usage
/// into per-provider counters.
pub struct ProviderGateway {
    providers: Vec<Arc<dyn Provider>>,
    usage_log: tokio::sync::Mutex<Vec<Usage>>,
}

impl ProviderGateway {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self {
            providers,
            usage_log: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Per-provider counters aggregated so far (§4.3), exposed to C9/C10.
    pub async fn usage_snapshot(&self) -> Vec<Usage> {
        self.usage_log.lock().await.clone()
    }

    async fn record(&self, usage: Usage) {
        self.usage_log.lock().await.push(usage);
    }

    /// Picks a provider: the routing hint's named provider if healthy,
    /// otherwise the cheapest healthy provider meeting the requested task
    /// class (§4.3).
    async fn route(&self, hint: &RoutingHint) -> Result<Arc<dyn Provider>, ProviderError> {
        if let Some(name) = &hint.provider {
            let provider = self
                .providers
                .iter()
                .find(|p| p.name() == name)
                .ok_or_else(|| ProviderError::NoHealthyProvider(name.clone()))?;
            if !provider.health().await {
                return Err(ProviderError::NoHealthyProvider(name.clone()));
            }
            return Ok(provider.clone());
        }

        let wanted = hint.task_class.unwrap_or(TaskClass::Standard);
        let mut candidates = Vec::new();
        for provider in &self.providers {
            if class_rank(provider.task_class()) >= class_rank(wanted) && provider.health().await
            {
                candidates.push(provider.clone());
            }
        }
        candidates.sort_by(|a, b| a.cost_per_unit().cmp(&b.cost_per_unit()));
        candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NoHealthyProvider(format!("{wanted:?}")))
    }

    pub async fn generate_text(
        &self,
        prompt: &str,
        hint: &RoutingHint,
    ) -> Result<String, ProviderError> {
        let provider = self.route(hint).await?;
        let (text, usage) = provider.generate_text(prompt).await?;
        self.record(usage).await;
        Ok(text)
    }

    pub async fn embed(&self, text: &str, hint: &RoutingHint) -> Result<Vec<f32>, ProviderError> {
        let provider = self.route(hint).await?;
        let (vector, usage) = provider.embed(text).await?;
        self.record(usage).await;
        Ok(vector)
    }

    pub async fn knowledge_query(
        &self,
        query: &str,
        hint: &RoutingHint,
    ) -> Result<Vec<KnowledgeSnippet>, ProviderError> {
        let provider = self.route(hint).await?;
        let (snippets, usage) = provider.knowledge_query(query).await?;
        self.record(usage).await;
        Ok(snippets)
    }

    /// Runs a safety check and converts a `Block` verdict into a
    /// `SafetyViolation` failure, per §4.3.
    pub async fn safety_check(&self, text: &str, hint: &RoutingHint) -> Result<(), ProviderError> {
        let provider = self.route(hint).await?;
        match provider.safety_check(text).await? {
            SafetyVerdict::Allow => Ok(()),
            SafetyVerdict::Block { reason } => Err(ProviderError::SafetyViolation { reason }),
        }
    }

    pub async fn invoke_named_action(
        &self,
        name: &str,
        params: &BTreeMap<String, Value>,
        hint: &RoutingHint,
    ) -> Result<Value, ProviderError> {
        let provider = self.route(hint).await?;
        provider.invoke_named_action(name, params).await
    }
}
