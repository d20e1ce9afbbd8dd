//! ONNX Runtime backend for the inference capability

pub mod onnx_engine;
pub use onnx_engine::{OnnxConfig, OnnxEmbeddingEngine, OnnxError};
