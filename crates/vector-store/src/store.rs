use crate::error::{Result, VectorStoreError};
use crate::paths::{commit_staged, stage_bytes};
use crate::types::{DocId, Document, NewDocument};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const METADATA_SCHEMA_VERSION: u32 = 1;

/// Document metadata stored in the same ordinal order as the vector index.
///
/// Document `n` always has id `n`; the join with the index is positional.
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    documents: Vec<Document>,
    path: Option<PathBuf>,
}

#[derive(Serialize)]
struct PersistedDocumentsRef<'a> {
    schema_version: u32,
    documents: &'a [Document],
}

#[derive(Deserialize)]
struct PersistedDocuments {
    schema_version: u32,
    documents: Vec<Document>,
}

impl DocumentStore {
    /// Store that never touches disk; `persist` is a no-op.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the metadata persisted at `path`, or start empty if it does not exist yet.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let documents = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let persisted: PersistedDocuments = serde_json::from_slice(&bytes)
                    .map_err(|e| VectorStoreError::persistence("parse", &path, e))?;
                if persisted.schema_version != METADATA_SCHEMA_VERSION {
                    return Err(VectorStoreError::IntegrityError(format!(
                        "Unsupported metadata schema_version {} (expected {METADATA_SCHEMA_VERSION})",
                        persisted.schema_version
                    )));
                }
                if let Some((ordinal, doc)) = persisted
                    .documents
                    .iter()
                    .enumerate()
                    .find(|(ordinal, doc)| doc.id != *ordinal as DocId)
                {
                    return Err(VectorStoreError::IntegrityError(format!(
                        "{}: document at position {ordinal} has id {}",
                        path.display(),
                        doc.id
                    )));
                }
                log::info!(
                    "Loaded {} documents from {}",
                    persisted.documents.len(),
                    path.display()
                );
                persisted.documents
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(VectorStoreError::persistence("read", &path, err)),
        };

        Ok(Self {
            documents,
            path: Some(path),
        })
    }

    /// Store `documents` under the ids the vector index assigned to their vectors.
    ///
    /// The ids must continue the store's sequence (`len..len + n`); anything else means the two
    /// structures have diverged and nothing is stored.
    pub fn append(
        &mut self,
        ids: &[DocId],
        documents: Vec<NewDocument>,
        added_at: u64,
    ) -> Result<Vec<DocId>> {
        if ids.len() != documents.len() {
            return Err(VectorStoreError::IntegrityError(format!(
                "{} ids supplied for {} documents",
                ids.len(),
                documents.len()
            )));
        }
        let start = self.documents.len() as DocId;
        if let Some((offset, id)) = ids
            .iter()
            .enumerate()
            .find(|(offset, id)| **id != start + *offset as DocId)
        {
            return Err(VectorStoreError::IntegrityError(format!(
                "id {id} at batch offset {offset} does not continue the store (next id is {})",
                start + offset as DocId
            )));
        }

        self.documents.extend(
            ids.iter()
                .zip(documents)
                .map(|(id, doc)| Document::from_new(*id, doc, added_at)),
        );
        Ok(ids.to_vec())
    }

    /// Fetch by id; ids outside the store come back as `None`.
    #[must_use]
    pub fn get(&self, ids: &[DocId]) -> Vec<Option<Document>> {
        ids.iter().map(|id| self.document(*id).cloned()).collect()
    }

    #[must_use]
    pub fn document(&self, id: DocId) -> Option<&Document> {
        usize::try_from(id).ok().and_then(|idx| self.documents.get(idx))
    }

    #[must_use]
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn truncate(&mut self, len: usize) {
        self.documents.truncate(len);
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the metadata next to its file without replacing it. No-op for in-memory stores.
    pub async fn stage(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let persisted = PersistedDocumentsRef {
            schema_version: METADATA_SCHEMA_VERSION,
            documents: &self.documents,
        };
        let bytes = serde_json::to_vec_pretty(&persisted)
            .map_err(|e| VectorStoreError::persistence("serialize", path, e))?;
        stage_bytes(path, bytes).await
    }

    /// Replace the metadata file with what the last [`Self::stage`] wrote.
    pub async fn commit(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        commit_staged(path).await?;
        log::debug!(
            "Saved {} documents to {}",
            self.documents.len(),
            path.display()
        );
        Ok(())
    }

    pub async fn persist(&self) -> Result<()> {
        self.stage().await?;
        self.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn docs(contents: &[&str]) -> Vec<NewDocument> {
        contents
            .iter()
            .map(|c| NewDocument::new(*c, "news"))
            .collect()
    }

    #[test]
    fn append_stamps_ids_and_time() {
        let mut store = DocumentStore::in_memory();
        store.append(&[0, 1], docs(&["a", "b"]), 1_000).unwrap();
        store.append(&[2], docs(&["c"]), 2_000).unwrap();

        assert_eq!(store.len(), 3);
        let c = store.document(2).unwrap();
        assert_eq!(c.content, "c");
        assert_eq!(c.added_at, 2_000);
        assert_eq!(store.document(0).unwrap().added_at, 1_000);
    }

    #[test]
    fn append_rejects_ids_that_skip_or_repeat() {
        let mut store = DocumentStore::in_memory();
        store.append(&[0], docs(&["a"]), 1).unwrap();

        assert!(matches!(
            store.append(&[2], docs(&["gap"]), 1),
            Err(VectorStoreError::IntegrityError(_))
        ));
        assert!(matches!(
            store.append(&[0], docs(&["dup"]), 1),
            Err(VectorStoreError::IntegrityError(_))
        ));
        assert!(matches!(
            store.append(&[1, 2], docs(&["short"]), 1),
            Err(VectorStoreError::IntegrityError(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn get_reports_missing_ids_as_none() {
        let mut store = DocumentStore::in_memory();
        store.append(&[0, 1], docs(&["a", "b"]), 1).unwrap();

        let fetched = store.get(&[1, 7, 0]);
        assert_eq!(fetched.len(), 3);
        assert_eq!(fetched[0].as_ref().map(|d| d.content.as_str()), Some("b"));
        assert!(fetched[1].is_none());
        assert_eq!(fetched[2].as_ref().map(|d| d.id), Some(0));
    }

    #[tokio::test]
    async fn persist_and_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("metadata.json");

        let mut store = DocumentStore::load(&path).await.unwrap();
        assert!(store.is_empty());
        store
            .append(
                &[0, 1],
                vec![
                    NewDocument::new("TSM beats earnings", "earnings").with_ticker("TSM"),
                    NewDocument::new("Oil prices rise", "general"),
                ],
                42,
            )
            .unwrap();
        store.persist().await.unwrap();

        let loaded = DocumentStore::load(&path).await.unwrap();
        assert_eq!(loaded.documents(), store.documents());
    }

    #[tokio::test]
    async fn load_rejects_out_of_order_ids() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("metadata.json");
        std::fs::write(
            &path,
            r#"{"schema_version":1,"documents":[{"id":1,"content":"x","type":"news","added_at":0}]}"#,
        )
        .unwrap();

        let err = DocumentStore::load(&path).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::IntegrityError(_)), "{err}");
    }

    #[tokio::test]
    async fn unreadable_metadata_is_a_persistence_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("metadata.json");
        std::fs::write(&path, b"not json").unwrap();

        let err = DocumentStore::load(&path).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::PersistenceError(_)), "{err}");
    }

    #[tokio::test]
    async fn failed_stage_leaves_the_previous_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("metadata.json");
        let mut store = DocumentStore::load(&path).await.unwrap();
        store.append(&[0], docs(&["first"]), 1).unwrap();
        store.persist().await.unwrap();

        std::fs::create_dir_all(tmp.path().join("metadata.json.tmp")).unwrap();
        store.append(&[1], docs(&["second"]), 2).unwrap();
        assert!(store.stage().await.is_err());

        let reloaded = DocumentStore::load(&path).await.unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.document(0).unwrap().content, "first");
    }

    #[tokio::test]
    async fn persist_failure_keeps_memory_state() {
        let tmp = TempDir::new().unwrap();
        // A directory where the metadata file should be makes the final rename fail.
        let path = tmp.path().join("metadata.json");
        std::fs::create_dir_all(path.join("occupied")).unwrap();

        let mut store = DocumentStore::load(tmp.path().join("other.json")).await.unwrap();
        store.path = Some(path);
        store.append(&[0], docs(&["kept"]), 1).unwrap();

        let err = store.persist().await.unwrap_err();
        assert!(matches!(err, VectorStoreError::PersistenceError(_)), "{err}");
        assert_eq!(store.len(), 1);
        assert_eq!(store.document(0).unwrap().content, "kept");
    }
}
