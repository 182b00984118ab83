use crate::embeddings::{Embedder, EmbeddingConfig};
use crate::error::{Result, VectorStoreError};
use ndarray::{Array2, ArrayD, ArrayView2, ArrayView3, Ix2, Ix3};
use ort::session::{builder::GraphOptimizationLevel, Session, SessionInputs};
use ort::value::{DynTensor, Tensor};
use std::collections::HashMap;
use std::sync::Mutex;
use tokenizers::{Encoding, PaddingParams, Tokenizer, TruncationParams};

const MODEL_FILE_NAME: &str = "model.onnx";
const TOKENIZER_FILE_NAME: &str = "tokenizer.json";

/// Sentence encoder on ONNX Runtime: tokenize, run, mean-pool token states.
pub struct OnnxEmbedder {
    model_id: String,
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    max_batch: usize,
    dimension: usize,
}

/// Token matrices for one batch, all `(batch, seq_len)`.
struct BatchInputs {
    input_ids: Array2<i64>,
    attention_mask: Array2<i64>,
    token_type_ids: Array2<i64>,
}

fn onnx_error(what: &str, err: impl std::fmt::Display) -> VectorStoreError {
    VectorStoreError::EmbeddingError(format!("{what}: {err}"))
}

impl OnnxEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_root = config.model_dir.join(&config.model_id);
        let model_path = model_root.join(MODEL_FILE_NAME);
        let tokenizer_path = model_root.join(TOKENIZER_FILE_NAME);
        if !model_path.is_file() || !tokenizer_path.is_file() {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Model files for '{}' not found (looked for {} and {}); set FINRAG_MODEL_DIR or run with --embed-mode stub",
                config.model_id,
                model_path.display(),
                tokenizer_path.display(),
            )));
        }

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| onnx_error("Cannot read tokenizer", e))?;
        // Default padding strategy pads each batch to its longest member.
        tokenizer.with_padding(Some(PaddingParams::default()));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.max_length,
                ..TruncationParams::default()
            }))
            .map_err(|e| onnx_error("Cannot configure truncation", e))?;

        let threads = std::thread::available_parallelism().map_or(1, |n| (n.get() / 4).clamp(1, 4));
        let session = Session::builder()
            .and_then(|builder| builder.with_intra_threads(threads))
            .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|builder| builder.commit_from_file(&model_path))
            .map_err(|e| onnx_error("Cannot load ONNX model", e))?;

        log::info!(
            "ONNX encoder '{}' loaded from {} ({} intra threads)",
            config.model_id,
            model_path.display(),
            threads
        );

        Ok(Self {
            model_id: config.model_id.clone(),
            session: Mutex::new(session),
            tokenizer,
            max_batch: config.max_batch.max(1),
            dimension: config.dimension,
        })
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| onnx_error("Tokenization failed", e))?;
        let inputs = batch_inputs(&encodings)?;

        let output = {
            let mut session = self.session.lock().map_err(|_| {
                VectorStoreError::EmbeddingError("ONNX session mutex poisoned".to_string())
            })?;

            let mut feed: HashMap<String, DynTensor> = HashMap::new();
            for input in &session.inputs {
                let matrix = match input.name.as_str() {
                    "input_ids" => &inputs.input_ids,
                    "attention_mask" => &inputs.attention_mask,
                    "token_type_ids" => &inputs.token_type_ids,
                    other => {
                        return Err(VectorStoreError::EmbeddingError(format!(
                            "Model '{}' expects unsupported input '{other}'",
                            self.model_id
                        )))
                    }
                };
                let tensor = Tensor::from_array(matrix.clone().into_dyn())
                    .map_err(|e| onnx_error("Cannot build input tensor", e))?;
                feed.insert(input.name.clone(), tensor.upcast());
            }

            let outputs = session
                .run(SessionInputs::from(feed))
                .map_err(|e| onnx_error("ONNX inference failed", e))?;
            if outputs.len() == 0 {
                return Err(VectorStoreError::EmbeddingError(format!(
                    "Model '{}' produced no outputs",
                    self.model_id
                )));
            }
            let output = outputs[0]
                .try_extract_array::<f32>()
                .map_err(|e| onnx_error("Cannot read ONNX output", e))?
                .to_owned();
            drop(outputs);
            drop(session);
            output
        };

        pooled_embeddings(output, inputs.attention_mask.view(), self.dimension)
    }
}

impl Embedder for OnnxEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts
            .chunks(self.max_batch)
            .map(|chunk| self.encode(chunk))
            .try_fold(Vec::with_capacity(texts.len()), |mut all, chunk| {
                all.extend(chunk?);
                Ok(all)
            })
    }
}

fn batch_inputs(encodings: &[Encoding]) -> Result<BatchInputs> {
    let rows = encodings.len();
    let cols = encodings.first().map_or(0, Encoding::len);
    if encodings.iter().any(|encoding| encoding.len() != cols) {
        return Err(VectorStoreError::EmbeddingError(
            "Tokenizer returned a ragged batch; padding is not applied".to_string(),
        ));
    }

    let matrix = |field: fn(&Encoding) -> &[u32]| {
        Array2::from_shape_fn((rows, cols), |(row, col)| {
            i64::from(field(&encodings[row])[col])
        })
    };
    Ok(BatchInputs {
        input_ids: matrix(Encoding::get_ids),
        attention_mask: matrix(Encoding::get_attention_mask),
        token_type_ids: matrix(Encoding::get_type_ids),
    })
}

/// Sentence vectors from the first model output: rank 2 is already pooled, rank 3 holds token
/// states that are averaged over the attention mask.
fn pooled_embeddings(
    output: ArrayD<f32>,
    attention_mask: ArrayView2<'_, i64>,
    dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    let shape_error = |e| onnx_error("Unexpected ONNX output shape", e);
    let vectors: Vec<Vec<f32>> = match output.ndim() {
        2 => output
            .into_dimensionality::<Ix2>()
            .map_err(shape_error)?
            .outer_iter()
            .map(|row| row.to_vec())
            .collect(),
        3 => {
            let hidden = output.into_dimensionality::<Ix3>().map_err(shape_error)?;
            if hidden.shape()[..2] != *attention_mask.shape() {
                return Err(VectorStoreError::EmbeddingError(format!(
                    "Token states {:?} do not line up with attention mask {:?}",
                    hidden.shape(),
                    attention_mask.shape()
                )));
            }
            masked_mean(hidden.view(), attention_mask)
        }
        rank => {
            return Err(VectorStoreError::EmbeddingError(format!(
                "ONNX output has rank {rank}; expected 2 (pooled) or 3 (token states)"
            )))
        }
    };

    match vectors.iter().find(|v| v.len() != dimension) {
        Some(bad) => Err(VectorStoreError::InvalidDimension {
            expected: dimension,
            actual: bad.len(),
        }),
        None => Ok(vectors),
    }
}

/// Mean of each sample's token states over positions whose mask is non-zero.
fn masked_mean(hidden: ArrayView3<'_, f32>, attention_mask: ArrayView2<'_, i64>) -> Vec<Vec<f32>> {
    hidden
        .outer_iter()
        .zip(attention_mask.outer_iter())
        .map(|(tokens, mask)| {
            let weights = mask.mapv(|m| if m == 0 { 0.0f32 } else { 1.0 });
            let kept = weights.sum();
            let summed = tokens.t().dot(&weights);
            if kept > 0.0 {
                (summed / kept).to_vec()
            } else {
                summed.to_vec()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingMode;
    use ndarray::array;

    #[test]
    fn padding_positions_do_not_count_toward_the_mean() {
        let hidden = array![[[1.0f32, 2.0], [3.0, 4.0], [100.0, 100.0]]];
        let mask = array![[1i64, 1, 0]];
        assert_eq!(masked_mean(hidden.view(), mask.view()), vec![vec![2.0, 3.0]]);
    }

    #[test]
    fn fully_masked_sample_pools_to_zero() {
        let hidden = array![[[5.0f32, 5.0]]];
        let mask = array![[0i64]];
        assert_eq!(masked_mean(hidden.view(), mask.view()), vec![vec![0.0, 0.0]]);
    }

    #[test]
    fn pooled_output_is_used_as_is() {
        let output = array![[0.5f32, 0.5], [1.0, 0.0]].into_dyn();
        let mask = Array2::<i64>::ones((2, 4));
        let vectors = pooled_embeddings(output, mask.view(), 2).unwrap();
        assert_eq!(vectors, vec![vec![0.5, 0.5], vec![1.0, 0.0]]);
    }

    #[test]
    fn token_states_must_match_the_mask() {
        let output = ndarray::Array3::<f32>::zeros((1, 3, 2)).into_dyn();
        let mask = Array2::<i64>::ones((1, 4));
        assert!(pooled_embeddings(output, mask.view(), 2).is_err());
    }

    #[test]
    fn output_width_must_match_the_configured_dimension() {
        let output = array![[0.5f32, 0.5, 0.0]].into_dyn();
        let mask = Array2::<i64>::ones((1, 1));
        let err = pooled_embeddings(output, mask.view(), 2).unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::InvalidDimension {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn missing_model_files_are_reported() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = EmbeddingConfig {
            mode: EmbeddingMode::Onnx,
            model_dir: tmp.path().to_path_buf(),
            ..EmbeddingConfig::default()
        };
        let Err(err) = OnnxEmbedder::new(&config) else {
            panic!("expected missing model files to fail");
        };
        assert!(err.to_string().contains("not found"), "{err}");
    }
}
