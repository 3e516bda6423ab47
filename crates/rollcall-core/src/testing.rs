//! Scripted collaborators for unit tests.

use crate::capability::{
    AnalyzerError, DetectOptions, FaceAnalyzer, FrameSource, ModelLoadError, ModelLoader,
    Notifier, ReferenceError, ReferenceLoader, SourceError,
};
use crate::types::{BoundingBox, DetectedFace, Embedding, Frame, ReferenceImage};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn frame(sequence: u32) -> Frame {
    Frame::new(vec![128u8; 16], 4, 4, sequence)
}

pub fn face(values: &[f32]) -> DetectedFace {
    DetectedFace {
        region: BoundingBox {
            x: 10.0,
            y: 10.0,
            width: 50.0,
            height: 50.0,
            confidence: 0.9,
            landmarks: None,
        },
        embedding: Embedding::new(values.to_vec()),
        expressions: None,
    }
}

/// Returns scripted frames in order, then a default frame forever.
#[derive(Default)]
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<Frame, SourceError>>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<Frame, SourceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn current_frame(&self) -> Result<Frame, SourceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(frame(call as u32)))
    }
}

/// Answers detection calls from a queue; an exhausted queue means "no faces".
#[derive(Default)]
pub struct ScriptedAnalyzer {
    script: Mutex<VecDeque<Result<Vec<DetectedFace>, AnalyzerError>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedAnalyzer {
    pub fn new(script: Vec<Result<Vec<DetectedFace>, AnalyzerError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FaceAnalyzer for ScriptedAnalyzer {
    async fn detect_faces(
        &self,
        _frame: &Frame,
        _options: &DetectOptions,
    ) -> Result<Vec<DetectedFace>, AnalyzerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Answers detection calls by frame sequence number, for concurrent callers.
#[derive(Default)]
pub struct KeyedAnalyzer {
    answers: HashMap<u32, Vec<DetectedFace>>,
    delay: Option<Duration>,
    panic_on: Option<u32>,
    calls: AtomicUsize,
}

impl KeyedAnalyzer {
    pub fn new(answers: HashMap<u32, Vec<DetectedFace>>) -> Self {
        Self {
            answers,
            ..Self::default()
        }
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Panic when asked about the frame with this sequence number.
    pub fn with_panic_on(mut self, sequence: u32) -> Self {
        self.panic_on = Some(sequence);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FaceAnalyzer for KeyedAnalyzer {
    async fn detect_faces(
        &self,
        frame: &Frame,
        _options: &DetectOptions,
    ) -> Result<Vec<DetectedFace>, AnalyzerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_on == Some(frame.sequence) {
            panic!("analyzer blew up on frame {}", frame.sequence);
        }
        match self.answers.get(&frame.sequence) {
            Some(faces) => Ok(faces.clone()),
            None => Err(AnalyzerError::Inference(format!(
                "no scripted answer for frame {}",
                frame.sequence
            ))),
        }
    }
}

/// Serves reference images named `"<n>.png"` as frames with sequence `n`.
/// Any other location is reported as missing.
pub struct NumberedReferences;

#[async_trait]
impl ReferenceLoader for NumberedReferences {
    async fn fetch(&self, image: &ReferenceImage) -> Result<Frame, ReferenceError> {
        image
            .location()
            .strip_suffix(".png")
            .and_then(|n| n.parse().ok())
            .map(frame)
            .ok_or_else(|| ReferenceError::NotFound(image.location().to_string()))
    }
}

pub struct StaticLoader {
    fail: bool,
    calls: AtomicUsize,
}

impl StaticLoader {
    pub fn ok() -> Self {
        Self {
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLoader for StaticLoader {
    async fn load_models(&self) -> Result<Vec<String>, ModelLoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(ModelLoadError::NotFound {
                name: "detector".into(),
                path: "/nonexistent/det.onnx".into(),
            })
        } else {
            Ok(vec!["detector".into(), "recognizer".into()])
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str, _duration: Duration) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
