use crate::error::{Result, VectorStoreError};
use crate::types::DocId;
use async_trait::async_trait;
use std::cmp::Ordering;

/// A vector waiting to be assigned an id.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingVector {
    pub vector: Vec<f32>,
    /// Used by backends that need a stable external key (the document's ticker).
    pub key_hint: Option<String>,
}

impl PendingVector {
    #[must_use]
    pub const fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            key_hint: None,
        }
    }
}

/// Storage and exact k-NN search over unit-norm vectors.
///
/// Ids are assigned densely from zero in insertion order, so they double as ordinal offsets into
/// the document store regardless of backend.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Short backend name reported in stats.
    fn backend(&self) -> &'static str;

    fn dimension(&self) -> usize;

    fn count(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Append vectors and return their ids in input order. Either every vector is added or none.
    async fn add(&mut self, vectors: Vec<PendingVector>) -> Result<Vec<DocId>>;

    /// Up to `min(top_k, count)` hits ordered by descending score, ties by ascending id.
    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<(DocId, f32)>>;

    /// Forget every entry with id >= `len`.
    fn truncate(&mut self, len: usize);

    /// Write the backend's local state next to its artifact without replacing it. No-op for
    /// in-memory indexes.
    async fn stage(&self) -> Result<()>;

    /// Replace the artifact with the state written by the last [`VectorIndex::stage`].
    async fn commit(&self) -> Result<()>;

    /// Flush the backend's local state to disk.
    async fn persist(&self) -> Result<()> {
        self.stage().await?;
        self.commit().await
    }
}

pub(crate) const fn check_dimension(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(VectorStoreError::InvalidDimension {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Ranking order for hits: higher score first, then lower id. NaN ranks last.
pub(crate) fn rank_order(a: &(DocId, f32), b: &(DocId, f32)) -> Ordering {
    let key = |score: f32| if score.is_nan() { f32::NEG_INFINITY } else { score };
    key(b.1)
        .partial_cmp(&key(a.1))
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.0.cmp(&b.0))
}
