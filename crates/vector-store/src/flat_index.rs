use crate::embeddings::dot;
use crate::error::{Result, VectorStoreError};
use crate::index::{check_dimension, rank_order, PendingVector, VectorIndex};
use crate::paths::{commit_staged, stage_bytes};
use crate::types::DocId;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};

const INDEX_MAGIC: &[u8; 4] = b"FVI1";
const HEADER_LEN: usize = 4 + 4 + 8;

/// Exact brute-force index over vectors stored contiguously in insertion order.
///
/// Id `n` is the `n`-th row. Search is an O(n·D) inner-product scan with a bounded heap for the
/// top-k, which is the right trade-off up to tens of thousands of vectors.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    data: Vec<f32>,
    path: Option<PathBuf>,
}

impl FlatIndex {
    /// In-memory index; `persist` is a no-op.
    #[must_use]
    pub const fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
            path: None,
        }
    }

    /// Load the index persisted at `path`, or start empty if the file does not exist yet.
    pub async fn load(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let data = decode_index(&bytes, dimension, &path)?;
                log::info!(
                    "Loaded flat index from {} ({} vectors, dim {dimension})",
                    path.display(),
                    data.len() / dimension.max(1)
                );
                data
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No flat index at {}; starting empty", path.display());
                Vec::new()
            }
            Err(err) => return Err(VectorStoreError::persistence("read", &path, err)),
        };

        Ok(Self {
            dimension,
            data,
            path: Some(path),
        })
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The stored vector for `id`, if any.
    #[must_use]
    pub fn vector(&self, id: DocId) -> Option<&[f32]> {
        let row = usize::try_from(id).ok()?;
        let start = row.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    fn rows(&self) -> impl Iterator<Item = (DocId, &[f32])> {
        self.data
            .chunks_exact(self.dimension.max(1))
            .enumerate()
            .map(|(row, vector)| (row as DocId, vector))
    }
}

/// Heap entry whose ordering puts the worst-ranked hit on top.
struct Candidate(DocId, f32);

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        rank_order(&(self.0, self.1), &(other.0, other.1))
    }
}

#[async_trait]
impl VectorIndex for FlatIndex {
    fn backend(&self) -> &'static str {
        "flat"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn count(&self) -> usize {
        if self.dimension == 0 {
            return 0;
        }
        self.data.len() / self.dimension
    }

    async fn add(&mut self, vectors: Vec<PendingVector>) -> Result<Vec<DocId>> {
        for pending in &vectors {
            check_dimension(self.dimension, &pending.vector)?;
        }

        let start = self.count() as DocId;
        self.data.reserve(vectors.len() * self.dimension);
        for pending in &vectors {
            self.data.extend_from_slice(&pending.vector);
        }
        Ok((start..start + vectors.len() as DocId).collect())
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<(DocId, f32)>> {
        check_dimension(self.dimension, query)?;
        if top_k == 0 || self.data.is_empty() {
            return Ok(Vec::new());
        }

        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(top_k + 1);
        for (id, vector) in self.rows() {
            heap.push(Candidate(id, dot(query, vector)));
            if heap.len() > top_k {
                heap.pop();
            }
        }

        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|Candidate(id, score)| (id, score))
            .collect())
    }

    fn truncate(&mut self, len: usize) {
        self.data.truncate(len.saturating_mul(self.dimension));
    }

    async fn stage(&self) -> Result<()> {
        match &self.path {
            Some(path) => stage_bytes(path, encode_index(self.dimension, &self.data)).await,
            None => Ok(()),
        }
    }

    async fn commit(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        commit_staged(path).await?;
        log::debug!(
            "Flat index saved to {} ({} vectors)",
            path.display(),
            self.count()
        );
        Ok(())
    }
}

fn encode_index(dimension: usize, data: &[f32]) -> Vec<u8> {
    let count = if dimension == 0 { 0 } else { data.len() / dimension };
    let mut out = Vec::with_capacity(HEADER_LEN + data.len() * 4);
    out.extend_from_slice(INDEX_MAGIC);
    #[allow(clippy::cast_possible_truncation)]
    let dim = dimension as u32;
    out.extend_from_slice(&dim.to_le_bytes());
    out.extend_from_slice(&(count as u64).to_le_bytes());
    for v in data {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn decode_index(bytes: &[u8], expected_dimension: usize, path: &Path) -> Result<Vec<f32>> {
    let corrupt = |reason: &str| {
        VectorStoreError::IntegrityError(format!("{}: {reason}", path.display()))
    };

    if bytes.len() < HEADER_LEN || &bytes[0..4] != INDEX_MAGIC {
        return Err(corrupt("not a flat index file"));
    }
    let dim = u32::from_le_bytes(
        bytes[4..8]
            .try_into()
            .map_err(|_| corrupt("truncated header"))?,
    ) as usize;
    let count = u64::from_le_bytes(
        bytes[8..16]
            .try_into()
            .map_err(|_| corrupt("truncated header"))?,
    );
    if dim != expected_dimension {
        return Err(VectorStoreError::IntegrityError(format!(
            "{}: index dimension {dim} does not match embedding dimension {expected_dimension}",
            path.display()
        )));
    }

    let values = usize::try_from(count)
        .ok()
        .and_then(|count| count.checked_mul(dim))
        .ok_or_else(|| corrupt("vector count overflows"))?;
    let expected_len = values
        .checked_mul(4)
        .and_then(|len| len.checked_add(HEADER_LEN))
        .ok_or_else(|| corrupt("vector count overflows"))?;
    if bytes.len() != expected_len {
        return Err(corrupt(&format!(
            "expected {expected_len} bytes for {count} vectors, found {}",
            bytes.len()
        )));
    }

    Ok(bytes[HEADER_LEN..]
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
