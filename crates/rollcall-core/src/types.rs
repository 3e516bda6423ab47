use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A grayscale frame handed to the face analyzer.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Wrap an already-converted grayscale buffer.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
            is_dark: false,
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("is_dark", &self.is_dark)
            .finish_non_exhaustive()
    }
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Euclidean distance between two embeddings. Lower = more similar.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Per-expression scores (e.g. "happy" → 0.92) when the analyzer provides them.
pub type ExpressionScores = BTreeMap<String, f32>;

/// One face as reported by the analyzer.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub region: BoundingBox,
    pub embedding: Embedding,
    pub expressions: Option<ExpressionScores>,
}

/// A face observed during one monitor tick.
#[derive(Debug, Clone)]
pub struct Observation {
    pub embedding: Embedding,
    pub region: BoundingBox,
    pub expressions: Option<ExpressionScores>,
}

impl From<DetectedFace> for Observation {
    fn from(face: DetectedFace) -> Self {
        Self {
            embedding: face.embedding,
            region: face.region,
            expressions: face.expressions,
        }
    }
}

/// Location of a reference image: a filesystem path, a `file://` URI or an
/// `http(s)://` URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceImage(String);

impl ReferenceImage {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn location(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferenceImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The identity the monitor watches for: one label and its reference embeddings.
///
/// `embeddings` may be empty when no reference image produced a usable face.
/// Such a profile never matches anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledProfile {
    pub label: String,
    pub embeddings: Vec<Embedding>,
}

impl EnrolledProfile {
    pub fn new(label: impl Into<String>, embeddings: Vec<Embedding>) -> Self {
        Self {
            label: label.into(),
            embeddings,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Label side of a match: the enrolled identity, or nobody.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLabel {
    Identity(String),
    NoMatch,
}

impl fmt::Display for MatchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchLabel::Identity(label) => f.write_str(label),
            MatchLabel::NoMatch => f.write_str("unknown"),
        }
    }
}

/// Result of matching one observed embedding against the enrolled profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub label: MatchLabel,
    /// Distance to the nearest reference embedding (infinite for an empty profile).
    pub distance: f32,
}

impl MatchResult {
    /// True when this result names `label`.
    pub fn is_match(&self, label: &str) -> bool {
        matches!(&self.label, MatchLabel::Identity(l) if l == label)
    }
}
