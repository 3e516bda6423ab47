//! FER+ facial expression classifier via ONNX Runtime.
//!
//! Takes a 64×64 grayscale crop of the detected face box (raw 0–255 values)
//! and returns softmax scores over eight expressions.

use crate::alignment::sample_bilinear;
use crate::ModelError;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::{BoundingBox, ExpressionScores, Frame};
use std::path::Path;

const INPUT_SIZE: usize = 64;

/// Output order of the FER+ model.
pub const EXPRESSIONS: [&str; 8] = [
    "neutral",
    "happiness",
    "surprise",
    "sadness",
    "anger",
    "disgust",
    "fear",
    "contempt",
];

pub struct ExpressionClassifier {
    session: Session,
}

impl ExpressionClassifier {
    pub fn load(model_path: &Path) -> Result<Self, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;
        tracing::info!(path = %model_path.display(), "FER+ expression model loaded");

        Ok(Self { session })
    }

    pub fn classify(&mut self, frame: &Frame, face: &BoundingBox) -> Result<ExpressionScores, ModelError> {
        let input = input_tensor(frame, face);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("expression output: {e}")))?;
        scores(raw)
    }
}

/// The face box resampled to 64×64, padded with black outside the frame.
fn input_tensor(frame: &Frame, face: &BoundingBox) -> Array4<f32> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let step_x = face.width / INPUT_SIZE as f32;
    let step_y = face.height / INPUT_SIZE as f32;

    Array4::from_shape_fn((1, 1, INPUT_SIZE, INPUT_SIZE), |(_, _, y, x)| {
        let sx = face.x + (x as f32 + 0.5) * step_x - 0.5;
        let sy = face.y + (y as f32 + 0.5) * step_y - 0.5;
        sample_bilinear(&frame.data, w, h, sx, sy, 0.0)
    })
}

/// Softmax over the eight logits, keyed by expression name.
fn scores(logits: &[f32]) -> Result<ExpressionScores, ModelError> {
    if logits.len() != EXPRESSIONS.len() {
        return Err(ModelError::InferenceFailed(format!(
            "expected {} expression scores, got {}",
            EXPRESSIONS.len(),
            logits.len()
        )));
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exp.iter().sum();

    Ok(EXPRESSIONS
        .iter()
        .zip(exp)
        .map(|(name, e)| (name.to_string(), e / total))
        .collect())
}
