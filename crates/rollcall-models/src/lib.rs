//! rollcall-models — ONNX face analysis for the attendance monitor.
//!
//! SCRFD finds faces and their five landmarks, ArcFace turns each aligned
//! face into a 512-dim embedding, and an optional FER+ model scores facial
//! expressions. [`OnnxAnalyzer`] wraps them behind the core `FaceAnalyzer`
//! and `ModelLoader` traits.

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod expression;
pub mod recognizer;

pub use analyzer::{ModelPaths, OnnxAnalyzer};

use rollcall_core::AnalyzerError;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_DETECTOR_MODEL: &str = "det_10g.onnx";
pub const DEFAULT_RECOGNIZER_MODEL: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0} (download from insightface and place in the model dir)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("face has no landmarks, alignment needs all five")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<ModelError> for AnalyzerError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::InvalidFrame(msg) => AnalyzerError::InvalidFrame(msg),
            other => AnalyzerError::Inference(other.to_string()),
        }
    }
}

/// `$XDG_DATA_HOME/rollcall/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    let base = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("/usr/share"));
    base.join("rollcall").join("models")
}
