//! # ONNX Embedding Engine
//!
//! Sentence-transformer style inference with ONNX Runtime: tokenize,
//! run the encoder, mean-pool `last_hidden_state` over real tokens, then
//! L2-normalize.
//!
//! The engine is blocking and needs `&mut self` per run; the model wrapper
//! serializes access and the gateway only calls it from the offload pool.

use ndarray::ArrayViewD;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::{debug, info, instrument};

/// Configuration for ONNX Runtime
#[derive(Debug, Clone)]
pub struct OnnxConfig {
    /// Path to ONNX Runtime library (DLL/so/dylib), if not on the loader path
    pub library_path: Option<String>,
    /// Intra-op thread pool size for inference
    pub thread_pool_size: usize,
    /// Token sequences are truncated to this length
    pub max_sequence_length: usize,
}

impl Default for OnnxConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            thread_pool_size: 1,
            max_sequence_length: 256,
        }
    }
}

/// Errors raised by the engine; the model wrapper maps them to load or
/// inference failures depending on the phase.
#[derive(Debug, thiserror::Error)]
pub enum OnnxError {
    #[error("Failed to load ONNX model: {0}")]
    Session(String),

    #[error("Failed to load tokenizer: {0}")]
    Tokenizer(String),

    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("ONNX inference failed: {0}")]
    Inference(String),

    #[error("Unexpected model output: {0}")]
    Output(String),
}

/// ONNX-based embedding engine for generating text embeddings
#[derive(Debug)]
pub struct OnnxEmbeddingEngine {
    /// ONNX Runtime session for model inference
    session: Session,
    /// HuggingFace tokenizer for text preprocessing
    tokenizer: Tokenizer,
    max_seq_length: usize,
}

impl OnnxEmbeddingEngine {
    /// Create a new ONNX embedding engine
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file (model.onnx)
    /// * `tokenizer_path` - Path to the tokenizer configuration file (tokenizer.json)
    /// * `onnx_config` - ONNX Runtime configuration
    pub fn new(
        model_path: &Path,
        tokenizer_path: &Path,
        onnx_config: &OnnxConfig,
    ) -> Result<Self, OnnxError> {
        info!(
            "Initializing ONNX embedding engine with model: {}",
            model_path.display()
        );

        if let Some(library_path) = &onnx_config.library_path {
            // Read once by ort when the first session is built
            std::env::set_var("ORT_DYLIB_PATH", library_path);
            debug!("Set ORT_DYLIB_PATH to: {}", library_path);
        }

        let session = Session::builder()
            .map_err(|e| OnnxError::Session(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| OnnxError::Session(e.to_string()))?
            .with_intra_threads(onnx_config.thread_pool_size)
            .map_err(|e| OnnxError::Session(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| OnnxError::Session(e.to_string()))?;

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| OnnxError::Tokenizer(e.to_string()))?;

        info!(
            "ONNX embedding engine initialized with {} threads",
            onnx_config.thread_pool_size
        );
        Ok(Self {
            session,
            tokenizer,
            max_seq_length: onnx_config.max_sequence_length.max(1),
        })
    }

    /// Generate embeddings for a batch of texts, one vector per text in
    /// input order.
    #[instrument(skip(self, texts), fields(text_count = texts.len()))]
    pub fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, OnnxError> {
        let mut embeddings = Vec::with_capacity(texts.len());

        for text in texts {
            let encoding = self
                .tokenizer
                .encode(text.as_str(), true)
                .map_err(|e| OnnxError::Tokenization(e.to_string()))?;

            let seq_len = encoding.get_ids().len().min(self.max_seq_length);
            let input_ids: Vec<i64> = encoding.get_ids()[..seq_len]
                .iter()
                .map(|&x| x as i64)
                .collect();
            let attention_mask: Vec<u32> = encoding.get_attention_mask()[..seq_len].to_vec();
            let mask_i64: Vec<i64> = attention_mask.iter().map(|&x| x as i64).collect();
            let token_type_ids = vec![0i64; seq_len];

            let shape = [1i64, seq_len as i64];
            let input_ids = Tensor::from_array((shape, input_ids))
                .map_err(|e| OnnxError::Inference(e.to_string()))?;
            let mask_tensor = Tensor::from_array((shape, mask_i64))
                .map_err(|e| OnnxError::Inference(e.to_string()))?;
            let token_type_ids = Tensor::from_array((shape, token_type_ids))
                .map_err(|e| OnnxError::Inference(e.to_string()))?;

            let outputs = self
                .session
                .run(vec![
                    ("input_ids", input_ids),
                    ("attention_mask", mask_tensor),
                    ("token_type_ids", token_type_ids),
                ])
                .map_err(|e| OnnxError::Inference(e.to_string()))?;

            let (shape, data) = outputs["last_hidden_state"]
                .try_extract_tensor::<f32>()
                .map_err(|e| OnnxError::Output(e.to_string()))?;
            let dims: Vec<usize> = shape.iter().map(|&x| x as usize).collect();
            let hidden = ndarray::ArrayView::from_shape(dims.as_slice(), data)
                .map_err(|e| OnnxError::Output(e.to_string()))?;

            let pooled = mean_pooling(&hidden, &attention_mask)?;
            embeddings.push(normalize_embedding(&pooled)?);
        }

        debug!("Generated {} embeddings", embeddings.len());
        Ok(embeddings)
    }
}

/// Average token vectors of `[1, seq_len, hidden]` where the mask is 1
fn mean_pooling(output: &ArrayViewD<f32>, attention_mask: &[u32]) -> Result<Vec<f32>, OnnxError> {
    let shape = output.shape();
    if shape.len() != 3 {
        return Err(OnnxError::Output(format!(
            "expected 3D output tensor, got {}D",
            shape.len()
        )));
    }

    let (seq_len, hidden_size) = (shape[1], shape[2]);
    if attention_mask.len() != seq_len {
        return Err(OnnxError::Output(format!(
            "attention mask length {} doesn't match sequence length {}",
            attention_mask.len(),
            seq_len
        )));
    }

    let mut pooled = vec![0.0f32; hidden_size];
    let mut valid_tokens = 0usize;
    for (seq_idx, _) in attention_mask.iter().enumerate().filter(|(_, mask)| **mask == 1) {
        for (hidden_idx, value) in pooled.iter_mut().enumerate() {
            *value += output[[0, seq_idx, hidden_idx]];
        }
        valid_tokens += 1;
    }

    if valid_tokens == 0 {
        return Err(OnnxError::Output("no valid tokens in attention mask".to_string()));
    }

    for value in &mut pooled {
        *value /= valid_tokens as f32;
    }
    Ok(pooled)
}

/// L2 normalization
fn normalize_embedding(embedding: &[f32]) -> Result<Vec<f32>, OnnxError> {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return Err(OnnxError::Output("cannot normalize zero vector".to_string()));
    }
    Ok(embedding.iter().map(|x| x / norm).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_mean_pooling_ignores_padding() {
        // seq_len 3, hidden 2; last token is padding
        let data = Array3::from_shape_vec((1, 3, 2), vec![1.0, 2.0, 3.0, 4.0, 100.0, 100.0])
            .unwrap()
            .into_dyn();

        let pooled = mean_pooling(&data.view(), &[1, 1, 0]).unwrap();
        assert_eq!(pooled, vec![2.0, 3.0]);
    }

    #[test]
    fn test_mean_pooling_rejects_bad_shapes() {
        let data = Array3::<f32>::zeros((1, 2, 2)).into_dyn();
        assert!(mean_pooling(&data.view(), &[1, 1, 1]).is_err());
        assert!(mean_pooling(&data.view(), &[0, 0]).is_err());
    }

    #[test]
    fn test_normalize_embedding() {
        let normalized = normalize_embedding(&[3.0, 4.0]).unwrap();
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
        assert!(normalize_embedding(&[0.0, 0.0]).is_err());
    }
}
