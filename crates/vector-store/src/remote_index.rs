use crate::error::{Result, VectorStoreError};
use crate::index::{check_dimension, rank_order, PendingVector, VectorIndex};
use crate::paths::{commit_staged, stage_bytes};
use crate::remote_client::{RemoteRecord, RemoteVectorClient};
use crate::types::DocId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub const REMOTE_KEYS_SCHEMA_VERSION: u32 = 1;

/// Index backed by a managed vector service.
///
/// The service addresses vectors by string key, so this keeps the id ↔ key mapping locally and
/// hands out the same dense ids as [`crate::FlatIndex`].
pub struct RemoteIndex {
    client: Arc<dyn RemoteVectorClient>,
    dimension: usize,
    keys: Vec<String>,
    ids_by_key: HashMap<String, DocId>,
    /// Vectors still held by the service after their ids were rolled back.
    orphaned: usize,
    path: Option<PathBuf>,
}

#[derive(Serialize)]
struct PersistedKeysRef<'a> {
    schema_version: u32,
    dimension: usize,
    keys: &'a [String],
    orphaned: usize,
}

#[derive(Deserialize)]
struct PersistedKeys {
    schema_version: u32,
    dimension: usize,
    keys: Vec<String>,
    #[serde(default)]
    orphaned: usize,
}

impl RemoteIndex {
    /// Index with an in-memory key mapping; `persist` is a no-op.
    pub fn new(client: Arc<dyn RemoteVectorClient>, dimension: usize) -> Self {
        Self {
            client,
            dimension,
            keys: Vec::new(),
            ids_by_key: HashMap::new(),
            orphaned: 0,
            path: None,
        }
    }

    /// Load the key mapping persisted at `path`, or start empty if it does not exist yet.
    pub async fn load(
        client: Arc<dyn RemoteVectorClient>,
        path: impl AsRef<Path>,
        dimension: usize,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (keys, orphaned) = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let persisted: PersistedKeys = serde_json::from_slice(&bytes)
                    .map_err(|e| VectorStoreError::persistence("parse", &path, e))?;
                if persisted.schema_version != REMOTE_KEYS_SCHEMA_VERSION {
                    return Err(VectorStoreError::IntegrityError(format!(
                        "Unsupported remote key map schema_version {} (expected {REMOTE_KEYS_SCHEMA_VERSION})",
                        persisted.schema_version
                    )));
                }
                if persisted.dimension != dimension {
                    return Err(VectorStoreError::IntegrityError(format!(
                        "{}: remote index dimension {} does not match embedding dimension {dimension}",
                        path.display(),
                        persisted.dimension
                    )));
                }
                (persisted.keys, persisted.orphaned)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => (Vec::new(), 0),
            Err(err) => return Err(VectorStoreError::persistence("read", &path, err)),
        };

        let ids_by_key: HashMap<String, DocId> = keys
            .iter()
            .enumerate()
            .map(|(id, key)| (key.clone(), id as DocId))
            .collect();
        if ids_by_key.len() != keys.len() {
            return Err(VectorStoreError::IntegrityError(format!(
                "{}: duplicate remote keys",
                path.display()
            )));
        }
        log::info!(
            "Loaded remote key map from {} ({} entries)",
            path.display(),
            keys.len()
        );

        Ok(Self {
            client,
            dimension,
            keys,
            ids_by_key,
            orphaned,
            path: Some(path),
        })
    }

    /// Check the service is reachable and agrees on the vector dimension.
    ///
    /// An unreachable service is only logged: reads and writes will report it per call.
    pub async fn verify_remote(&self) -> Result<()> {
        match self.client.describe().await {
            Ok(stats) if stats.dimension != 0 && stats.dimension != self.dimension => {
                Err(VectorStoreError::IntegrityError(format!(
                    "Remote index dimension {} does not match embedding dimension {}",
                    stats.dimension, self.dimension
                )))
            }
            Ok(stats) => {
                log::info!(
                    "Remote index reachable ({} vectors remote, {} mapped locally)",
                    stats.total_vector_count,
                    self.keys.len()
                );
                Ok(())
            }
            Err(VectorStoreError::BackendUnavailable(reason)) => {
                log::warn!("Remote index unreachable at startup: {reason}");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    #[must_use]
    pub fn key(&self, id: DocId) -> Option<&str> {
        let idx = usize::try_from(id).ok()?;
        self.keys.get(idx).map(String::as_str)
    }
}

/// `{ticker}_{unix_millis}_{id}`; the id keeps keys unique within one batch.
fn external_key(key_hint: Option<&str>, millis: u128, id: DocId) -> String {
    let prefix: String = key_hint
        .map(str::trim)
        .filter(|hint| !hint.is_empty())
        .unwrap_or("unknown")
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '.') {
                ch
            } else {
                '-'
            }
        })
        .collect();
    format!("{prefix}_{millis}_{id}")
}

#[async_trait]
impl VectorIndex for RemoteIndex {
    fn backend(&self) -> &'static str {
        "remote"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn count(&self) -> usize {
        self.keys.len()
    }

    async fn add(&mut self, vectors: Vec<PendingVector>) -> Result<Vec<DocId>> {
        for pending in &vectors {
            check_dimension(self.dimension, &pending.vector)?;
        }
        if vectors.is_empty() {
            return Ok(Vec::new());
        }

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let start = self.keys.len() as DocId;
        let mut keys = Vec::with_capacity(vectors.len());
        let mut records = Vec::with_capacity(vectors.len());
        for (offset, pending) in vectors.into_iter().enumerate() {
            let id = start + offset as DocId;
            let key = external_key(pending.key_hint.as_deref(), millis, id);
            records.push(RemoteRecord {
                id: key.clone(),
                values: pending.vector,
                metadata: serde_json::json!({
                    "doc_id": id,
                    "ticker": pending.key_hint.unwrap_or_default(),
                }),
            });
            keys.push(key);
        }

        self.client.upsert(records).await?;

        let ids: Vec<DocId> = (start..start + keys.len() as DocId).collect();
        for (id, key) in ids.iter().zip(&keys) {
            self.ids_by_key.insert(key.clone(), *id);
        }
        self.keys.extend(keys);
        Ok(ids)
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<(DocId, f32)>> {
        check_dimension(self.dimension, query)?;
        if top_k == 0 || self.keys.is_empty() {
            return Ok(Vec::new());
        }

        // Orphaned vectors can take result slots on the service side.
        let matches = self
            .client
            .query(query, top_k.saturating_add(self.orphaned))
            .await?;
        let mut hits: Vec<(DocId, f32)> = matches
            .into_iter()
            .filter_map(|m| match self.ids_by_key.get(&m.id) {
                Some(id) => Some((*id, m.score)),
                None => {
                    log::debug!("Ignoring remote match '{}' with no local mapping", m.id);
                    None
                }
            })
            .collect();
        hits.sort_by(rank_order);
        hits.truncate(top_k.min(self.keys.len()));
        Ok(hits)
    }

    fn truncate(&mut self, len: usize) {
        if len >= self.keys.len() {
            return;
        }
        for key in self.keys.drain(len..) {
            self.ids_by_key.remove(&key);
            self.orphaned += 1;
        }
    }

    async fn stage(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let persisted = PersistedKeysRef {
            schema_version: REMOTE_KEYS_SCHEMA_VERSION,
            dimension: self.dimension,
            keys: &self.keys,
            orphaned: self.orphaned,
        };
        let bytes = serde_json::to_vec_pretty(&persisted)
            .map_err(|e| VectorStoreError::persistence("serialize", path, e))?;
        stage_bytes(path, bytes).await
    }

    async fn commit(&self) -> Result<()> {
        match &self.path {
            Some(path) => commit_staged(path).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_client::{RemoteIndexStats, RemoteMatch};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-process stand-in for the managed service: exact dot-product search over upserted keys.
    #[derive(Default)]
    struct FakeService {
        records: Mutex<Vec<RemoteRecord>>,
        offline: AtomicBool,
    }

    #[async_trait]
    impl RemoteVectorClient for FakeService {
        async fn upsert(&self, records: Vec<RemoteRecord>) -> Result<()> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(VectorStoreError::BackendUnavailable("offline".into()));
            }
            self.records.lock().unwrap().extend(records);
            Ok(())
        }

        async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<RemoteMatch>> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(VectorStoreError::BackendUnavailable("offline".into()));
            }
            let records = self.records.lock().unwrap();
            let mut matches: Vec<RemoteMatch> = records
                .iter()
                .map(|r| RemoteMatch {
                    id: r.id.clone(),
                    score: r.values.iter().zip(vector).map(|(a, b)| a * b).sum(),
                })
                .collect();
            // Reverse insertion order so the index has to restore the id tie-break itself.
            matches.reverse();
            matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
            matches.truncate(top_k);
            Ok(matches)
        }

        async fn describe(&self) -> Result<RemoteIndexStats> {
            Ok(RemoteIndexStats {
                dimension: 2,
                total_vector_count: self.records.lock().unwrap().len() as u64,
            })
        }
    }

    fn pending(vector: &[f32], ticker: Option<&str>) -> PendingVector {
        PendingVector {
            vector: vector.to_vec(),
            key_hint: ticker.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn add_assigns_dense_ids_and_unique_keys() {
        let service = Arc::new(FakeService::default());
        let mut index = RemoteIndex::new(service.clone(), 2);

        let ids = index
            .add(vec![
                pending(&[1.0, 0.0], Some("TSM")),
                pending(&[0.0, 1.0], Some("TSM")),
                pending(&[0.6, 0.8], None),
            ])
            .await
            .unwrap();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(index.count(), 3);

        let k0 = index.key(0).unwrap();
        let k1 = index.key(1).unwrap();
        assert!(k0.starts_with("TSM_"), "{k0}");
        assert!(index.key(2).unwrap().starts_with("unknown_"));
        assert_ne!(k0, k1);
        assert_eq!(service.records.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn search_orders_like_the_flat_index() {
        let service = Arc::new(FakeService::default());
        let mut index = RemoteIndex::new(service, 2);
        index
            .add(vec![
                pending(&[0.0, 1.0], None),
                pending(&[1.0, 0.0], None),
                pending(&[1.0, 0.0], None),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits, vec![(1, 1.0), (2, 1.0)]);
    }

    #[tokio::test]
    async fn failed_upsert_leaves_mapping_untouched() {
        let service = Arc::new(FakeService::default());
        let mut index = RemoteIndex::new(service.clone(), 2);
        index.add(vec![pending(&[1.0, 0.0], None)]).await.unwrap();

        service.offline.store(true, Ordering::SeqCst);
        let err = index
            .add(vec![pending(&[0.0, 1.0], None)])
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::BackendUnavailable(_)));
        assert_eq!(index.count(), 1);

        let err = index.search(&[1.0, 0.0], 1).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn truncated_keys_are_ignored_in_results() {
        let service = Arc::new(FakeService::default());
        let mut index = RemoteIndex::new(service, 2);
        index
            .add(vec![pending(&[0.0, 1.0], None), pending(&[1.0, 0.0], None)])
            .await
            .unwrap();
        index.truncate(1);

        let hits = index.search(&[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 0);
    }

    #[tokio::test]
    async fn rolled_back_vectors_do_not_shrink_results() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("remote_keys.json");
        let service = Arc::new(FakeService::default());

        let mut index = RemoteIndex::load(service.clone(), &path, 2).await.unwrap();
        index
            .add(vec![pending(&[0.0, 1.0], None), pending(&[1.0, 0.0], None)])
            .await
            .unwrap();
        // The service keeps [1, 0], which outranks everything still mapped.
        index.truncate(1);
        index.add(vec![pending(&[0.6, 0.8], None)]).await.unwrap();

        let ids: Vec<DocId> = index
            .search(&[1.0, 0.0], 2)
            .await
            .unwrap()
            .iter()
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(ids, vec![1, 0]);

        index.persist().await.unwrap();
        let reloaded = RemoteIndex::load(service, &path, 2).await.unwrap();
        assert_eq!(reloaded.search(&[1.0, 0.0], 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn key_map_persists_and_reloads() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("remote_keys.json");
        let service = Arc::new(FakeService::default());

        let mut index = RemoteIndex::load(service.clone(), &path, 2).await.unwrap();
        index
            .add(vec![pending(&[1.0, 0.0], Some("ASML"))])
            .await
            .unwrap();
        index.persist().await.unwrap();

        let reloaded = RemoteIndex::load(service.clone(), &path, 2).await.unwrap();
        assert_eq!(reloaded.count(), 1);
        assert_eq!(reloaded.key(0), index.key(0));
        assert_eq!(reloaded.search(&[1.0, 0.0], 1).await.unwrap()[0].0, 0);

        let err = RemoteIndex::load(service, &path, 3).await.err().unwrap();
        assert!(matches!(err, VectorStoreError::IntegrityError(_)));
    }

    #[tokio::test]
    async fn verify_remote_rejects_dimension_mismatch() {
        let service = Arc::new(FakeService::default());
        assert!(RemoteIndex::new(service.clone(), 2).verify_remote().await.is_ok());
        let err = RemoteIndex::new(service, 4).verify_remote().await.unwrap_err();
        assert!(matches!(err, VectorStoreError::IntegrityError(_)));
    }

    #[test]
    fn external_key_sanitizes_hint() {
        assert_eq!(external_key(Some("BRK B"), 17, 3), "BRK-B_17_3");
        assert_eq!(external_key(Some("  "), 17, 0), "unknown_17_0");
    }
}
