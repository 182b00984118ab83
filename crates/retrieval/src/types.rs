use finrag_vector_store::{Document, SearchResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    /// Top similarity when it clears the service threshold, else 0.
    pub confidence: f32,
    pub total_found: usize,
}

impl SearchResponse {
    /// No hits; what a degraded search reports.
    #[must_use]
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            results: Vec::new(),
            confidence: 0.0,
            total_found: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextResponse {
    /// Documents grouped by bucket name; only non-dropped buckets are present.
    pub context: BTreeMap<String, Vec<Document>>,
    pub confidence: f32,
    pub total_documents: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_documents: usize,
    pub index_size: usize,
    pub dimension: usize,
    pub backend: String,
}
