use crate::config::{check_threshold, BackendKind, Durability, RetrievalConfig};
use crate::context::{bucket_by_type, gated_confidence, CONTEXT_TOP_K};
use crate::error::Result;
use crate::types::{ContextResponse, SearchResponse, StoreStats};
use finrag_vector_store::paths::{metadata_path, remote_keys_path, vectors_path};
use finrag_vector_store::{
    DocId, DocumentStore, EmbeddingModel, FlatIndex, HttpVectorClient, NewDocument,
    PendingVector, RemoteIndex, RemoteVectorClient, SearchResult, VectorIndex, VectorStoreError,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

/// How many candidates to pull per requested result when filtering by type.
const FILTER_OVERSAMPLE: usize = 4;

/// Vector index and document store, always mutated together.
struct IndexState {
    index: Box<dyn VectorIndex>,
    store: DocumentStore,
}

impl IndexState {
    /// Both artifacts are staged before either is replaced, so a failed write leaves the
    /// previous matching pair on disk.
    async fn persist(&self) -> finrag_vector_store::Result<()> {
        self.index.stage().await?;
        self.store.stage().await?;
        self.index.commit().await?;
        self.store.commit().await
    }

    fn rollback(&mut self, len: usize) {
        self.index.truncate(len);
        self.store.truncate(len);
    }
}

/// Semantic search over the document index with confidence gating and type bucketing.
///
/// Searches share a read lock; adds hold the write lock from id assignment through
/// persistence, so the index and store never disagree on count to an observer.
pub struct RetrievalService {
    embedder: EmbeddingModel,
    state: RwLock<IndexState>,
    confidence_threshold: f32,
    durability: Durability,
}

impl RetrievalService {
    /// Assemble a service from parts the caller already owns.
    ///
    /// Fails with `IntegrityError` when the index and store disagree on count or the embedder
    /// and index disagree on dimension, and with `EmbeddingError` for a zero-dimension embedder.
    pub fn new(
        embedder: EmbeddingModel,
        index: Box<dyn VectorIndex>,
        store: DocumentStore,
        config: &RetrievalConfig,
    ) -> Result<Self> {
        check_threshold(config.confidence_threshold)?;
        if embedder.dimension() == 0 {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Embedder '{}' reports dimension 0",
                embedder.model_id()
            ))
            .into());
        }
        if embedder.dimension() != index.dimension() {
            return Err(VectorStoreError::IntegrityError(format!(
                "Embedder '{}' produces {}-dimensional vectors but the {} index holds {}",
                embedder.model_id(),
                embedder.dimension(),
                index.backend(),
                index.dimension()
            ))
            .into());
        }
        if index.count() != store.len() {
            return Err(VectorStoreError::IntegrityError(format!(
                "{} index holds {} vectors but the document store holds {} documents",
                index.backend(),
                index.count(),
                store.len()
            ))
            .into());
        }

        Ok(Self {
            embedder,
            state: RwLock::new(IndexState { index, store }),
            confidence_threshold: config.confidence_threshold,
            durability: config.durability,
        })
    }

    /// Build the configured embedder and backend and load persisted state from `data_dir`.
    pub async fn open(config: &RetrievalConfig) -> Result<Self> {
        config.validate()?;
        let embedder = EmbeddingModel::from_config(&config.embedding)?;
        let dimension = embedder.dimension();
        let store = DocumentStore::load(metadata_path(&config.data_dir)).await?;

        let index: Box<dyn VectorIndex> = match config.backend {
            BackendKind::Flat => {
                Box::new(FlatIndex::load(vectors_path(&config.data_dir), dimension).await?)
            }
            BackendKind::Remote => {
                let client: Arc<dyn RemoteVectorClient> =
                    Arc::new(HttpVectorClient::new(&config.remote)?);
                let index =
                    RemoteIndex::load(client, remote_keys_path(&config.data_dir), dimension)
                        .await?;
                index.verify_remote().await?;
                Box::new(index)
            }
        };

        let service = Self::new(embedder, index, store, config)?;
        log::info!(
            "Retrieval service ready: backend={}, model={}, dim={}, documents={}",
            config.backend.as_str(),
            service.embedder.model_id(),
            dimension,
            service.state.read().await.store.len()
        );
        Ok(service)
    }

    #[must_use]
    pub const fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Embed and store `documents`; `false` means nothing was added (the cause is logged).
    pub async fn add_documents(&self, documents: Vec<NewDocument>) -> bool {
        let requested = documents.len();
        match self.try_add_documents(documents).await {
            Ok(ids) => {
                log::info!("Added {} documents to the index", ids.len());
                true
            }
            Err(err) => {
                log::error!("Failed to add {requested} documents: {err}");
                false
            }
        }
    }

    /// Like [`Self::add_documents`], returning the assigned ids or the typed error.
    ///
    /// Embedding happens before any mutation. Ids are assigned under the write lock and
    /// continue the store's sequence; concurrent calls are numbered in lock-acquisition order,
    /// not call order.
    pub async fn try_add_documents(
        &self,
        documents: Vec<NewDocument>,
    ) -> finrag_vector_store::Result<Vec<DocId>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<&str> = documents.iter().map(|doc| doc.content.as_str()).collect();
        let vectors = self.embedder.embed_batch(texts).await?;
        if vectors.is_empty() {
            return Err(VectorStoreError::EmbeddingError(
                "Embedding produced no vectors".to_string(),
            ));
        }
        let pending: Vec<PendingVector> = vectors
            .into_iter()
            .zip(&documents)
            .map(|(vector, doc)| PendingVector {
                vector,
                key_hint: doc.ticker.clone(),
            })
            .collect();

        let mut state = self.state.write().await;
        let before = state.store.len();
        let ids = state.index.add(pending).await?;
        if let Err(err) = state.store.append(&ids, documents, now_millis()) {
            state.index.truncate(before);
            return Err(err);
        }

        if let Err(err) = state.persist().await {
            match self.durability {
                Durability::BestEffort => {
                    log::error!(
                        "Persisting {} new documents failed; keeping them in memory: {err}",
                        ids.len()
                    );
                }
                Durability::Strict => {
                    log::error!(
                        "Persisting {} new documents failed; rolling back: {err}",
                        ids.len()
                    );
                    state.rollback(before);
                    if let Err(restore_err) = state.persist().await {
                        log::warn!("Could not restore persisted state after rollback: {restore_err}");
                    }
                    return Err(err);
                }
            }
        }
        Ok(ids)
    }

    /// Nearest documents to `query`. Any failure degrades to an empty, zero-confidence
    /// response; use [`Self::try_search`] to see the cause.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter_type: Option<&str>,
    ) -> SearchResponse {
        match self.try_search(query, top_k, filter_type).await {
            Ok(response) => response,
            Err(err) => {
                log::error!("Search failed for '{query}': {err}");
                SearchResponse::empty(query)
            }
        }
    }

    /// Up to `top_k` hits (0 is treated as 1), best first, ties by ascending id.
    ///
    /// With `filter_type`, only documents of exactly that type are returned and more
    /// candidates are fetched so the filtered list can still fill `top_k`.
    pub async fn try_search(
        &self,
        query: &str,
        top_k: usize,
        filter_type: Option<&str>,
    ) -> finrag_vector_store::Result<SearchResponse> {
        let top_k = top_k.max(1);
        log::debug!("Search: query='{query}', top_k={top_k}, filter={filter_type:?}");

        let vector = self.embedder.embed(query).await?;

        let state = self.state.read().await;
        let total = state.index.count();
        if total == 0 {
            return Ok(SearchResponse::empty(query));
        }
        let candidates = match filter_type {
            Some(_) => top_k.saturating_mul(FILTER_OVERSAMPLE).min(total),
            None => top_k,
        };
        let hits = state.index.search(&vector, candidates).await?;

        let mut results = Vec::with_capacity(top_k.min(hits.len()));
        for (id, score) in hits {
            let Some(document) = state.store.document(id) else {
                log::warn!("Index returned id {id} with no stored document");
                continue;
            };
            if filter_type.is_some_and(|wanted| document.doc_type != wanted) {
                continue;
            }
            results.push(SearchResult {
                document: document.clone(),
                similarity_score: score,
            });
            if results.len() == top_k {
                break;
            }
        }
        drop(state);

        // Hits arrive best first, so the head carries the maximum score.
        let confidence = gated_confidence(
            results.first().map(|result| result.similarity_score),
            self.confidence_threshold,
        );
        log::debug!(
            "Search completed: {} results, confidence {confidence:.3}",
            results.len()
        );

        Ok(SearchResponse {
            query: query.to_string(),
            total_found: results.len(),
            results,
            confidence,
        })
    }

    /// The top [`CONTEXT_TOP_K`] hits for `query` grouped into type buckets.
    ///
    /// With a non-empty `context_types`, only those buckets are returned.
    pub async fn get_context(
        &self,
        query: &str,
        context_types: Option<&HashSet<String>>,
    ) -> ContextResponse {
        let response = self.search(query, CONTEXT_TOP_K, None).await;
        ContextResponse {
            confidence: response.confidence,
            total_documents: response.total_found,
            context: bucket_by_type(response.results, context_types),
        }
    }

    pub async fn stats(&self) -> StoreStats {
        let state = self.state.read().await;
        StoreStats {
            total_documents: state.store.len(),
            index_size: state.index.count(),
            dimension: state.index.dimension(),
            backend: state.index.backend().to_string(),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
