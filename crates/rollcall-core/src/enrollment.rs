//! Enrollment: reference images in, one enrolled profile out.

use crate::capability::{
    AnalyzerError, DetectOptions, FaceAnalyzer, Notifier, ReferenceError, ReferenceLoader,
};
use crate::types::{Embedding, EnrolledProfile, ReferenceImage};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Why a reference image contributed no embedding.
#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("failed to load reference image: {0}")]
    Load(#[from] ReferenceError),
    #[error("face analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("no face detected")]
    NoFace,
    #[error("{0} faces detected, expected exactly one")]
    MultipleFaces(usize),
    #[error("enrollment task failed: {0}")]
    TaskFailed(String),
}

/// A reference image that was skipped, and why.
#[derive(Debug)]
pub struct SkippedImage {
    pub image: ReferenceImage,
    pub reason: EnrollError,
}

/// Profile plus the images that did not make it in.
#[derive(Debug)]
pub struct EnrollmentReport {
    pub profile: EnrolledProfile,
    pub skipped: Vec<SkippedImage>,
}

/// Builds an [`EnrolledProfile`] from reference images.
///
/// Every image is processed on its own task. A failing image is logged and
/// skipped; the build itself never fails.
pub struct EnrollmentBuilder {
    references: Arc<dyn ReferenceLoader>,
    analyzer: Arc<dyn FaceAnalyzer>,
    notifier: Arc<dyn Notifier>,
    notify_duration: Duration,
}

impl EnrollmentBuilder {
    pub fn new(
        references: Arc<dyn ReferenceLoader>,
        analyzer: Arc<dyn FaceAnalyzer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            references,
            analyzer,
            notifier,
            notify_duration: Duration::from_millis(2000),
        }
    }

    pub fn with_notify_duration(mut self, duration: Duration) -> Self {
        self.notify_duration = duration;
        self
    }

    pub async fn build(&self, label: &str, images: &[ReferenceImage]) -> EnrolledProfile {
        self.build_report(label, images).await.profile
    }

    /// Like [`build`](Self::build), also returning the skipped images.
    pub async fn build_report(&self, label: &str, images: &[ReferenceImage]) -> EnrollmentReport {
        let handles: Vec<_> = images
            .iter()
            .cloned()
            .map(|image| {
                let references = Arc::clone(&self.references);
                let analyzer = Arc::clone(&self.analyzer);
                tokio::spawn(async move { enroll_image(&*references, &*analyzer, &image).await })
            })
            .collect();

        let mut embeddings = Vec::with_capacity(images.len());
        let mut skipped = Vec::new();

        // Awaiting in input order keeps the embedding order stable.
        for (image, handle) in images.iter().zip(handles) {
            let outcome = handle
                .await
                .unwrap_or_else(|e| Err(EnrollError::TaskFailed(e.to_string())));
            match outcome {
                Ok(embedding) => {
                    tracing::debug!(image = %image, "reference image enrolled");
                    embeddings.push(embedding);
                }
                Err(reason) => {
                    tracing::warn!(image = %image, error = %reason, "skipping reference image");
                    skipped.push(SkippedImage {
                        image: image.clone(),
                        reason,
                    });
                }
            }
        }

        tracing::info!(
            label,
            enrolled = embeddings.len(),
            skipped = skipped.len(),
            "enrollment complete"
        );
        self.notifier.notify(
            &format!(
                "Enrollment complete: {label} ({} of {} reference images)",
                embeddings.len(),
                images.len()
            ),
            self.notify_duration,
        );

        EnrollmentReport {
            profile: EnrolledProfile::new(label, embeddings),
            skipped,
        }
    }
}

async fn enroll_image(
    references: &dyn ReferenceLoader,
    analyzer: &dyn FaceAnalyzer,
    image: &ReferenceImage,
) -> Result<Embedding, EnrollError> {
    let frame = references.fetch(image).await?;
    let mut faces = analyzer
        .detect_faces(&frame, &DetectOptions::default())
        .await?;
    match faces.len() {
        0 => Err(EnrollError::NoFace),
        1 => Ok(faces.remove(0).embedding),
        n => Err(EnrollError::MultipleFaces(n)),
    }
}
