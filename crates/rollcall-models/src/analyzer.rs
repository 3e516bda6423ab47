//! [`FaceAnalyzer`] + [`ModelLoader`] backed by the SCRFD and ArcFace sessions.

use crate::detector::{FaceDetector, DEFAULT_SCORE_THRESHOLD};
use crate::expression::ExpressionClassifier;
use crate::recognizer::FaceRecognizer;
use crate::ModelError;
use async_trait::async_trait;
use rollcall_core::{
    AnalyzerError, BoundingBox, DetectOptions, DetectedFace, Embedding, ExpressionScores,
    FaceAnalyzer, Frame, ModelLoadError, ModelLoader,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Where the model artifacts live. The expression model is optional.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
    pub expression: Option<PathBuf>,
}

impl ModelPaths {
    pub fn in_dir(dir: &Path, detector: &str, recognizer: &str) -> Self {
        Self {
            detector: dir.join(detector),
            recognizer: dir.join(recognizer),
            expression: None,
        }
    }

    pub fn with_expression(mut self, dir: &Path, expression: &str) -> Self {
        self.expression = Some(dir.join(expression));
        self
    }
}

struct Models {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    expressions: Option<ExpressionClassifier>,
}

impl Models {
    fn analyze(
        &mut self,
        frame: &Frame,
        score_threshold: f32,
        max_faces: Option<usize>,
    ) -> Result<Vec<DetectedFace>, ModelError> {
        let mut boxes = self.detector.detect(frame, score_threshold)?;
        if let Some(max) = max_faces {
            boxes.truncate(max);
        }

        let recognizer = &mut self.recognizer;
        let expressions = &mut self.expressions;
        describe_faces(
            boxes,
            |region| recognizer.extract(frame, region),
            |region| match expressions.as_mut() {
                Some(classifier) => classifier.classify(frame, region).map(Some),
                None => Ok(None),
            },
        )
    }
}

/// Embed (and optionally score) every detected box. Any failure fails the
/// whole frame so a half-described frame never passes for fewer faces.
fn describe_faces(
    boxes: Vec<BoundingBox>,
    mut embed: impl FnMut(&BoundingBox) -> Result<Embedding, ModelError>,
    mut express: impl FnMut(&BoundingBox) -> Result<Option<ExpressionScores>, ModelError>,
) -> Result<Vec<DetectedFace>, ModelError> {
    boxes
        .into_iter()
        .map(|region| -> Result<DetectedFace, ModelError> {
            let embedding = embed(&region)?;
            let expressions = express(&region)?;
            Ok(DetectedFace {
                region,
                embedding,
                expressions,
            })
        })
        .collect()
}

/// ONNX Runtime face analyzer.
///
/// Starts empty; [`ModelLoader::load_models`] must succeed before any
/// detection call, otherwise detection fails with
/// [`AnalyzerError::ModelsNotLoaded`]. Inference runs on the blocking pool.
pub struct OnnxAnalyzer {
    paths: ModelPaths,
    score_threshold: f32,
    models: Arc<Mutex<Option<Models>>>,
}

impl OnnxAnalyzer {
    pub fn new(paths: ModelPaths) -> Self {
        Self {
            paths,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            models: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.models.lock().map(|m| m.is_some()).unwrap_or(false)
    }
}

#[async_trait]
impl FaceAnalyzer for OnnxAnalyzer {
    async fn detect_faces(
        &self,
        frame: &Frame,
        options: &DetectOptions,
    ) -> Result<Vec<DetectedFace>, AnalyzerError> {
        if !self.is_loaded() {
            return Err(AnalyzerError::ModelsNotLoaded);
        }

        let models = Arc::clone(&self.models);
        let frame = frame.clone();
        let threshold = options.min_confidence.unwrap_or(self.score_threshold);
        let max_faces = options.max_faces;

        tokio::task::spawn_blocking(move || -> Result<Vec<DetectedFace>, AnalyzerError> {
            let mut guard = models
                .lock()
                .map_err(|_| AnalyzerError::Inference("model lock poisoned".into()))?;
            let models = guard.as_mut().ok_or(AnalyzerError::ModelsNotLoaded)?;
            Ok(models.analyze(&frame, threshold, max_faces)?)
        })
        .await
        .map_err(|e| AnalyzerError::Inference(format!("analysis task failed: {e}")))?
    }
}

#[async_trait]
impl ModelLoader for OnnxAnalyzer {
    async fn load_models(&self) -> Result<Vec<String>, ModelLoadError> {
        let expression = async {
            match &self.paths.expression {
                Some(path) => load_blocking("expression", path.clone(), ExpressionClassifier::load)
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };
        let (detector, recognizer, expressions) = tokio::try_join!(
            load_blocking("detector", self.paths.detector.clone(), FaceDetector::load),
            load_blocking("recognizer", self.paths.recognizer.clone(), FaceRecognizer::load),
            expression,
        )?;

        let mut slot = self
            .models
            .lock()
            .map_err(|_| ModelLoadError::TaskFailed("model lock poisoned".into()))?;
        *slot = Some(Models {
            detector,
            recognizer,
            expressions,
        });

        Ok([&self.paths.detector, &self.paths.recognizer]
            .into_iter()
            .chain(self.paths.expression.as_ref())
            .map(|p| p.display().to_string())
            .collect())
    }
}

async fn load_blocking<T: Send + 'static>(
    name: &'static str,
    path: PathBuf,
    load: fn(&Path) -> Result<T, ModelError>,
) -> Result<T, ModelLoadError> {
    tokio::task::spawn_blocking(move || {
        load(&path).map_err(|err| match err {
            ModelError::ModelNotFound(path) => ModelLoadError::NotFound {
                name: name.to_string(),
                path,
            },
            other => ModelLoadError::Load {
                name: name.to_string(),
                reason: other.to_string(),
            },
        })
    })
    .await
    .map_err(|e| ModelLoadError::TaskFailed(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing() -> OnnxAnalyzer {
        OnnxAnalyzer::new(ModelPaths::in_dir(
            Path::new("/nonexistent/rollcall-models"),
            "det_10g.onnx",
            "w600k_r50.onnx",
        ))
    }

    #[tokio::test]
    async fn test_detect_before_load_is_rejected() {
        let analyzer = missing();
        let frame = Frame::new(vec![0u8; 64], 8, 8, 0);
        let result = analyzer.detect_faces(&frame, &DetectOptions::default()).await;
        assert!(matches!(result, Err(AnalyzerError::ModelsNotLoaded)));
    }

    #[tokio::test]
    async fn test_missing_models_fail_to_load() {
        let analyzer = missing();
        let err = analyzer.load_models().await.unwrap_err();
        assert!(matches!(err, ModelLoadError::NotFound { .. }), "got {err}");
        assert!(!analyzer.is_loaded());
    }

    #[test]
    fn test_model_paths_in_dir() {
        let paths = ModelPaths::in_dir(Path::new("/models"), "a.onnx", "b.onnx");
        assert_eq!(paths.detector, PathBuf::from("/models/a.onnx"));
        assert_eq!(paths.recognizer, PathBuf::from("/models/b.onnx"));
        assert_eq!(paths.expression, None);

        let paths = paths.with_expression(Path::new("/extra"), "c.onnx");
        assert_eq!(paths.expression, Some(PathBuf::from("/extra/c.onnx")));
    }

    fn boxes(n: usize) -> Vec<BoundingBox> {
        (0..n)
            .map(|i| BoundingBox {
                x: i as f32 * 100.0,
                y: 0.0,
                width: 80.0,
                height: 80.0,
                confidence: 0.9,
                landmarks: None,
            })
            .collect()
    }

    #[test]
    fn test_describe_faces_keeps_every_box() {
        let faces = describe_faces(
            boxes(2),
            |region| Ok(Embedding::new(vec![region.x])),
            |_| Ok(Some(ExpressionScores::from([("neutral".to_string(), 1.0)]))),
        )
        .unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[1].embedding.values, vec![100.0]);
        assert!(faces[0].expressions.is_some());
    }

    #[test]
    fn test_embedding_failure_fails_the_frame() {
        // Two faces where the second cannot be embedded must not look like one face.
        let result = describe_faces(
            boxes(2),
            |region| {
                if region.x > 0.0 {
                    Err(ModelError::NoLandmarks)
                } else {
                    Ok(Embedding::new(vec![1.0]))
                }
            },
            |_| Ok(None),
        );
        let err = result.unwrap_err();
        assert!(matches!(err, ModelError::NoLandmarks));
        assert!(matches!(AnalyzerError::from(err), AnalyzerError::Inference(_)));
    }

    #[test]
    fn test_expression_failure_fails_the_frame() {
        let result = describe_faces(
            boxes(1),
            |_| Ok(Embedding::new(vec![1.0])),
            |_| Err(ModelError::InferenceFailed("expression output".into())),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_missing_expression_model_fails_to_load() {
        let dir = Path::new("/nonexistent/rollcall-models");
        let analyzer = OnnxAnalyzer::new(
            ModelPaths::in_dir(dir, "det_10g.onnx", "w600k_r50.onnx")
                .with_expression(dir, "emotion-ferplus-8.onnx"),
        );
        assert!(analyzer.load_models().await.is_err());
    }
}
