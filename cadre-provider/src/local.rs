//! A deterministic, local provider with no network I/O, so the rest of the
//! system can be exercised without live model access (SPEC_FULL.md §4.3).

use crate::{Provider, ProviderError, SafetyVerdict, TaskClass, Usage};
use async_trait::async_trait;
use cadre_core::rag::KnowledgeSnippet;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Deterministic provider used by `cadre-testing`'s scenario fixtures and by
/// anyone running the system without a live model backend.
pub struct LocalProvider {
    name: String,
    task_class: TaskClass,
    blocked_phrase: Option<String>,
}

impl LocalProvider {
    pub fn new(name: impl Into<String>, task_class: TaskClass) -> Self {
        Self {
            name: name.into(),
            task_class,
            blocked_phrase: None,
        }
    }

    /// Configures this provider to block any text containing `phrase` on
    /// `safety_check`, for exercising the safety-gate escalation path.
    pub fn blocking(mut self, phrase: impl Into<String>) -> Self {
        self.blocked_phrase = Some(phrase.into());
        self
    }

    fn usage(&self, units: u64) -> Usage {
        Usage {
            provider: self.name.clone(),
            duration: Duration::from_millis(5),
            units,
            cost: Decimal::new(units as i64, 3),
        }
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn task_class(&self) -> TaskClass {
        self.task_class
    }

    fn cost_per_unit(&self) -> Decimal {
        match self.task_class {
            TaskClass::Fast => Decimal::new(1, 3),
            TaskClass::Standard => Decimal::new(5, 3),
            TaskClass::Heavy => Decimal::new(20, 3),
        }
    }

    async fn health(&self) -> bool {
        true
    }

    async fn generate_text(&self, prompt: &str) -> Result<(String, Usage), ProviderError> {
        Ok((format!("ack: {prompt}"), self.usage(prompt.len() as u64)))
    }

    async fn embed(&self, text: &str) -> Result<(Vec<f32>, Usage), ProviderError> {
        let vector: Vec<f32> = text.bytes().take(8).map(|b| b as f32 / 255.0).collect();
        Ok((vector, self.usage(text.len() as u64)))
    }

    async fn knowledge_query(
        &self,
        query: &str,
    ) -> Result<(Vec<KnowledgeSnippet>, Usage), ProviderError> {
        let snippets = vec![KnowledgeSnippet {
            text: format!("runbook entry for '{query}'"),
            citation: "local://runbooks".into(),
            similarity: 0.5,
        }];
        Ok((snippets, self.usage(1)))
    }

    async fn safety_check(&self, text: &str) -> Result<SafetyVerdict, ProviderError> {
        if let Some(phrase) = &self.blocked_phrase {
            if text.contains(phrase.as_str()) {
                return Ok(SafetyVerdict::Block {
                    reason: format!("matched blocked phrase '{phrase}'"),
                });
            }
        }
        Ok(SafetyVerdict::Allow)
    }

    async fn invoke_named_action(
        &self,
        name: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<Value, ProviderError> {
        Ok(serde_json::json!({ "action": name, "params": params, "status": "ok" }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blocks_configured_phrase() {
        let provider = LocalProvider::new("local", TaskClass::Fast).blocking("danger");
        let verdict = provider.safety_check("this contains danger").await.unwrap();
        assert!(matches!(verdict, SafetyVerdict::Block { .. }));
    }

    #[tokio::test]
    async fn allows_unblocked_text() {
        let provider = LocalProvider::new("local", TaskClass::Fast).blocking("danger");
        let verdict = provider.safety_check("this is fine").await.unwrap();
        assert!(matches!(verdict, SafetyVerdict::Allow));
    }
}
