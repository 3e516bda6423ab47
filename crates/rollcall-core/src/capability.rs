//! Collaborator seams: where frames, faces, models and notifications come from.
//!
//! The monitor and the enrollment builder only ever talk to these traits.
//! Concrete implementations live in `rollcall-hw` (frames, reference images),
//! `rollcall-models` (ONNX analyzer + model loading) and `rollcalld` (D-Bus
//! notifications).

use crate::types::{DetectedFace, Frame, ReferenceImage};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("frame source unavailable: {0}")]
    Unavailable(String),
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("decode failed: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("models are not loaded")]
    ModelsNotLoaded,
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("model {name} not found at {path}")]
    NotFound { name: String, path: String },
    #[error("model {name} failed to load: {reason}")]
    Load { name: String, reason: String },
    #[error("model load task failed: {0}")]
    TaskFailed(String),
}

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("unsupported reference location: {0}")]
    UnsupportedLocation(String),
    #[error("reference image not found: {0}")]
    NotFound(String),
    #[error("failed to fetch {location}: {reason}")]
    Fetch { location: String, reason: String },
    #[error("failed to decode {location}: {reason}")]
    Decode { location: String, reason: String },
}

/// Detection tuning passed along with every frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectOptions {
    /// Override of the analyzer's confidence cut-off.
    pub min_confidence: Option<f32>,
    /// Keep at most this many faces (highest confidence first).
    pub max_faces: Option<usize>,
}

/// Live frame provider (camera, snapshot file, ...).
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn current_frame(&self) -> Result<Frame, SourceError>;
}

/// Face detection plus embedding extraction.
///
/// An empty result is a valid answer, not an error.
#[async_trait]
pub trait FaceAnalyzer: Send + Sync {
    async fn detect_faces(
        &self,
        frame: &Frame,
        options: &DetectOptions,
    ) -> Result<Vec<DetectedFace>, AnalyzerError>;
}

/// Bulk loader for the model artifacts the analyzer depends on.
///
/// Returns the names of the loaded artifacts. Nothing may call the analyzer
/// before this has succeeded.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load_models(&self) -> Result<Vec<String>, ModelLoadError>;
}

/// Resolves reference images into frames for enrollment.
#[async_trait]
pub trait ReferenceLoader: Send + Sync {
    async fn fetch(&self, image: &ReferenceImage) -> Result<Frame, ReferenceError>;
}

/// Fire-and-forget user-facing notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, duration: Duration);
}

/// Notifier that only writes to the log.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str, duration: Duration) {
        tracing::info!(
            message,
            duration_ms = duration.as_millis() as u64,
            "notification"
        );
    }
}
