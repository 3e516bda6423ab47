//! ArcFace embedding extraction via ONNX Runtime.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::ModelError;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::{BoundingBox, Embedding, Frame};
use std::path::Path;

const MEAN: f32 = 127.5;
const STD: f32 = 127.5;
const EMBEDDING_DIM: usize = 512;

pub struct FaceRecognizer {
    session: Session,
    version: String,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path) -> Result<Self, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        // "w600k_r50.onnx" -> "w600k_r50"
        let version = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "arcface".to_string());
        tracing::info!(path = %model_path.display(), version, "ArcFace recognizer loaded");

        Ok(Self { session, version })
    }

    /// L2-normalized embedding of `face`. The face must carry landmarks.
    pub fn extract(&mut self, frame: &Frame, face: &BoundingBox) -> Result<Embedding, ModelError> {
        let landmarks = face.landmarks.as_ref().ok_or(ModelError::NoLandmarks)?;
        let crop = alignment::align_face(&frame.data, frame.width, frame.height, landmarks);
        let input = input_tensor(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("embedding output: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(ModelError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: l2_normalize(raw),
            model_version: Some(self.version.clone()),
        })
    }
}

fn input_tensor(crop: &[u8]) -> Array4<f32> {
    Array4::from_shape_fn((1, 3, ALIGNED_SIZE, ALIGNED_SIZE), |(_, _, y, x)| {
        let pixel = crop.get(y * ALIGNED_SIZE + x).copied().unwrap_or(0) as f32;
        (pixel - MEAN) / STD
    })
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|v| v / norm).collect()
    } else {
        raw.to_vec()
    }
}
