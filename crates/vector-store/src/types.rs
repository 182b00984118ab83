use serde::{Deserialize, Serialize};

/// Identifier assigned by the vector index; doubles as the ordinal offset in the document store.
pub type DocId = u64;

pub const GENERAL_DOC_TYPE: &str = "general";

fn default_doc_type() -> String {
    GENERAL_DOC_TYPE.to_string()
}

/// A document as supplied by a caller, before the index assigns it an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", alias = "doc_type", default = "default_doc_type")]
    pub doc_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
}

impl NewDocument {
    pub fn new(content: impl Into<String>, doc_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            doc_type: doc_type.into(),
            ticker: None,
        }
    }

    #[must_use]
    pub fn with_ticker(mut self, ticker: impl Into<String>) -> Self {
        self.ticker = Some(ticker.into());
        self
    }
}

/// A stored document. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub content: String,
    #[serde(rename = "type", alias = "doc_type", default = "default_doc_type")]
    pub doc_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    /// Unix epoch milliseconds, stamped by the document store.
    pub added_at: u64,
}

impl Document {
    pub(crate) fn from_new(id: DocId, doc: NewDocument, added_at: u64) -> Self {
        Self {
            id,
            content: doc.content,
            doc_type: doc.doc_type,
            ticker: doc.ticker,
            added_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub document: Document,
    /// Cosine similarity in [-1, 1]; higher is better.
    pub similarity_score: f32,
}
