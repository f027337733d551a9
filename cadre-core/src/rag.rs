//! The RAG memory boundary (C3). SPEC_FULL.md specifies this only at the
//! contract the core consumes — similarity lookup and knowledge retrieval
//! are implemented by an external collaborator, never by this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single retrieved snippet with its source citation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    pub text: String,
    pub citation: String,
    pub similarity: f64,
}

/// Read-only knowledge retrieval boundary consumed by the provider gateway's
/// `knowledge_query` capability (§4.3). Implementations are external
/// collaborators; the core never writes through this trait.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn query(&self, query: &str) -> Vec<KnowledgeSnippet>;
}
