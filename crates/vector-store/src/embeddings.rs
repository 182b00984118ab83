use crate::error::{Result, VectorStoreError};
use crate::onnx::OnnxEmbedder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::spawn_blocking;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingMode {
    #[default]
    Onnx,
    Stub,
}

impl EmbeddingMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Onnx => "onnx",
            Self::Stub => "stub",
        }
    }
}

impl FromStr for EmbeddingMode {
    type Err = VectorStoreError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "stub" => Ok(Self::Stub),
            other => Err(VectorStoreError::EmbeddingError(format!(
                "Unsupported embedding mode '{other}' (expected 'onnx' or 'stub')"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub mode: EmbeddingMode,
    pub model_id: String,
    /// Directory holding `<model_id>/model.onnx` and `<model_id>/tokenizer.json`.
    pub model_dir: PathBuf,
    pub dimension: usize,
    pub max_length: usize,
    pub max_batch: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            mode: EmbeddingMode::Onnx,
            model_id: "all-MiniLM-L6-v2".to_string(),
            model_dir: PathBuf::from("models"),
            dimension: 384,
            max_length: 256,
            max_batch: 32,
        }
    }
}

/// A text embedding model: deterministic, fixed dimension, synchronous.
///
/// Implementations may return raw (un-normalized) vectors; [`EmbeddingModel`] normalizes them.
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Embed `texts`, one vector per input, in input order. May block for a long time.
    fn embed_batch_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Deterministic bag-of-words embeddings for tests and offline runs.
#[derive(Clone, Debug)]
pub struct StubEmbedder {
    dimension: usize,
}

impl StubEmbedder {
    #[must_use]
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for StubEmbedder {
    fn model_id(&self) -> &str {
        "stub"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| stub_embed(text, self.dimension))
            .collect())
    }
}

/// Embedding adapter used by the rest of the crate.
///
/// Runs the model on the blocking pool and guarantees every returned vector has the model's
/// dimension and unit L2 norm (a zero vector stays zero).
#[derive(Clone)]
pub struct EmbeddingModel {
    backend: Arc<dyn Embedder>,
    dimension: usize,
}

impl EmbeddingModel {
    pub fn new(backend: Arc<dyn Embedder>) -> Self {
        let dimension = backend.dimension();
        Self { backend, dimension }
    }

    #[must_use]
    pub fn stub(dimension: usize) -> Self {
        Self::new(Arc::new(StubEmbedder::new(dimension)))
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        if config.dimension == 0 {
            return Err(VectorStoreError::EmbeddingError(
                "Embedding dimension must be greater than zero".to_string(),
            ));
        }
        let model = match config.mode {
            EmbeddingMode::Stub => Self::stub(config.dimension),
            EmbeddingMode::Onnx => Self::new(Arc::new(OnnxEmbedder::new(config)?)),
        };
        log::info!(
            "Embedding model '{}' ready (mode {}, dim {})",
            model.model_id(),
            config.mode.as_str(),
            model.dimension()
        );
        Ok(model)
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_batch(vec![text]).await?;
        embeddings
            .pop()
            .ok_or_else(|| VectorStoreError::EmbeddingError("Empty embedding result".to_string()))
    }

    pub async fn embed_batch(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let owned: Vec<String> = texts.into_iter().map(ToString::to_string).collect();
        let expected = owned.len();
        let backend = self.backend.clone();
        let mut vectors = spawn_blocking(move || backend.embed_batch_blocking(&owned))
            .await
            .map_err(|e| VectorStoreError::EmbeddingError(format!("Join error: {e}")))??;

        if vectors.len() != expected {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Model '{}' returned {} embeddings for {expected} inputs",
                self.model_id(),
                vectors.len()
            )));
        }
        for vector in &mut vectors {
            if vector.len() != self.dimension {
                return Err(VectorStoreError::EmbeddingError(format!(
                    "Model '{}' produced a {}-dimensional vector (expected {})",
                    self.model_id(),
                    vector.len(),
                    self.dimension
                )));
            }
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(VectorStoreError::EmbeddingError(format!(
                    "Model '{}' produced a non-finite embedding",
                    self.model_id()
                )));
            }
            normalize(vector);
        }
        Ok(vectors)
    }

    #[must_use]
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }

        let dot_product = dot(a, b);
        let norm_a = l2_norm(a);
        let norm_b = l2_norm(b);

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        dot_product / (norm_a * norm_b)
    }
}

#[must_use]
pub fn l2_norm(vec: &[f32]) -> f32 {
    vec.iter().map(|v| v * v).sum::<f32>().sqrt()
}

#[inline]
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scale `vec` to unit length in place. Zero vectors are left untouched.
pub fn normalize(vec: &mut [f32]) {
    let norm = l2_norm(vec);
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

/// Signed feature hashing over lowercase word tokens, so texts sharing words score higher.
fn stub_embed(text: &str, dimension: usize) -> Vec<f32> {
    let mut vec = vec![0.0f32; dimension];
    if dimension == 0 {
        return vec;
    }
    let tokens = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase);
    for token in tokens {
        let hash = token_hash(&token);
        let slot = (hash % dimension as u64) as usize;
        let weight = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vec[slot] += weight;
    }
    normalize(&mut vec);
    vec
}

fn token_hash(token: &str) -> u64 {
    let folded = token
        .bytes()
        .fold(0u64, |acc, byte| (acc.rotate_left(5) ^ u64::from(byte)).wrapping_mul(0x517c_c1b7_2722_0a95));
    // Final avalanche so short tokens spread over every slot.
    let mixed = (folded ^ (folded >> 33)).wrapping_mul(0xff51_afd7_ed55_8ccd);
    mixed ^ (mixed >> 33)
}
