//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three feature strides followed by greedy
//! non-maximum suppression. Input frames are letterboxed into a square
//! 640×640 tensor.

use crate::alignment::sample_bilinear;
use crate::ModelError;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::{BoundingBox, Frame};
use std::collections::HashMap;
use std::path::Path;

const INPUT_SIZE: usize = 640;
const MEAN: f32 = 127.5;
const STD: f32 = 128.0;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
pub const NMS_IOU_THRESHOLD: f32 = 0.4;

/// Scale + padding that places a frame inside the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: usize) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let scaled_w = (width as f32 * scale).round();
        let scaled_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((target as f32 - scaled_w) / 2.0).floor(),
            pad_y: ((target as f32 - scaled_h) / 2.0).floor(),
        }
    }

    /// Model-input coordinates back to frame coordinates.
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions (score, bbox, kps) for one stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// Map output tensors to strides by name ("score_8", "bbox_16", ...),
/// falling back to the standard export order (scores, then bboxes, then kps).
fn output_layout(names: &[String]) -> [StrideOutputs; 3] {
    let by_name: HashMap<&str, usize> = names
        .iter()
        .enumerate()
        .map(|(i, n)| (n.as_str(), i))
        .collect();

    let named: Option<Vec<StrideOutputs>> = STRIDES
        .iter()
        .map(|stride| {
            Some(StrideOutputs {
                score: *by_name.get(format!("score_{stride}").as_str())?,
                bbox: *by_name.get(format!("bbox_{stride}").as_str())?,
                kps: *by_name.get(format!("kps_{stride}").as_str())?,
            })
        })
        .collect();

    match named {
        Some(layout) => [layout[0], layout[1], layout[2]],
        None => {
            tracing::debug!(?names, "SCRFD outputs unnamed; using positional layout");
            std::array::from_fn(|i| StrideOutputs {
                score: i,
                bbox: i + 3,
                kps: i + 6,
            })
        }
    }
}

pub struct FaceDetector {
    session: Session,
    layout: [StrideOutputs; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(ModelError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps per stride), model has {}",
                names.len()
            )));
        }
        let layout = output_layout(&names);
        tracing::info!(path = %model_path.display(), outputs = ?names, "SCRFD detector loaded");

        Ok(Self { session, layout })
    }

    /// Detect faces, highest confidence first.
    pub fn detect(&mut self, frame: &Frame, score_threshold: f32) -> Result<Vec<BoundingBox>, ModelError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(ModelError::InvalidFrame("empty frame".into()));
        }
        if frame.data.len() < (frame.width * frame.height) as usize {
            return Err(ModelError::InvalidFrame(format!(
                "{}x{} frame with {} bytes",
                frame.width,
                frame.height,
                frame.data.len()
            )));
        }

        let letterbox = Letterbox::fit(frame.width, frame.height, INPUT_SIZE);
        let input = input_tensor(frame, &letterbox);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (stride, slots) in STRIDES.iter().copied().zip(self.layout) {
            let tensor = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| ModelError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let level = StrideLevel {
                stride,
                scores: tensor(slots.score, "scores")?,
                boxes: tensor(slots.bbox, "boxes")?,
                kps: tensor(slots.kps, "kps")?,
            };
            candidates.extend(level.decode(&letterbox, score_threshold));
        }

        Ok(suppress(candidates, NMS_IOU_THRESHOLD))
    }
}

/// Letterboxed NCHW tensor; grayscale replicated into all three channels.
fn input_tensor(frame: &Frame, letterbox: &Letterbox) -> Array4<f32> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let scaled_w = (w as f32 * letterbox.scale).round();
    let scaled_h = (h as f32 * letterbox.scale).round();
    let inv = 1.0 / letterbox.scale;

    Array4::from_shape_fn((1, 3, INPUT_SIZE, INPUT_SIZE), |(_, _, y, x)| {
        let (lx, ly) = (x as f32 - letterbox.pad_x, y as f32 - letterbox.pad_y);
        if lx < 0.0 || ly < 0.0 || lx >= scaled_w || ly >= scaled_h {
            return 0.0;
        }
        let sx = ((lx + 0.5) * inv - 0.5).clamp(0.0, (w - 1) as f32);
        let sy = ((ly + 0.5) * inv - 0.5).clamp(0.0, (h - 1) as f32);
        (sample_bilinear(&frame.data, w, h, sx, sy, MEAN) - MEAN) / STD
    })
}

/// Raw outputs of one stride level.
struct StrideLevel<'a> {
    stride: usize,
    scores: &'a [f32],
    boxes: &'a [f32],
    kps: &'a [f32],
}

impl StrideLevel<'_> {
    fn decode(&self, letterbox: &Letterbox, threshold: f32) -> Vec<BoundingBox> {
        let grid = INPUT_SIZE / self.stride;
        let step = self.stride as f32;
        let anchors = grid * grid * ANCHORS_PER_CELL;

        (0..anchors.min(self.scores.len()))
            .filter(|&i| self.scores[i] > threshold)
            .filter_map(|i| {
                let cell = i / ANCHORS_PER_CELL;
                let ax = (cell % grid) as f32 * step;
                let ay = (cell / grid) as f32 * step;

                let d = self.boxes.get(i * 4..i * 4 + 4)?;
                let (x1, y1) = letterbox.to_frame(ax - d[0] * step, ay - d[1] * step);
                let (x2, y2) = letterbox.to_frame(ax + d[2] * step, ay + d[3] * step);

                let landmarks = self.kps.get(i * 10..i * 10 + 10).map(|k| {
                    std::array::from_fn(|p| {
                        letterbox.to_frame(ax + k[p * 2] * step, ay + k[p * 2 + 1] * step)
                    })
                });

                Some(BoundingBox {
                    x: x1,
                    y: y1,
                    width: x2 - x1,
                    height: y2 - y1,
                    confidence: self.scores[i],
                    landmarks,
                })
            })
            .collect()
    }
}

/// Greedy non-maximum suppression. Output is sorted by confidence.
fn suppress(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = w * h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 { inter / union } else { 0.0 }
}
