//! Startup sequence: load models, enroll, then start monitoring.

use crate::capability::{
    FaceAnalyzer, FrameSource, ModelLoadError, ModelLoader, Notifier, ReferenceLoader,
};
use crate::enrollment::{EnrollmentBuilder, SkippedImage};
use crate::monitor::{AttendanceMonitor, ConfigError, MonitorConfig, MonitorHandle};
use crate::types::{EnrolledProfile, ReferenceImage};
use std::sync::Arc;
use thiserror::Error;

pub const MODELS_LOADED: &str = "Models loaded";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid monitor configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("model load failed: {0}")]
    ModelLoad(#[from] ModelLoadError),
}

/// Everything a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub models: Arc<dyn ModelLoader>,
    pub references: Arc<dyn ReferenceLoader>,
    pub analyzer: Arc<dyn FaceAnalyzer>,
    pub source: Arc<dyn FrameSource>,
    pub notifier: Arc<dyn Notifier>,
}

/// A running monitoring session.
pub struct Session {
    pub profile: EnrolledProfile,
    pub skipped: Vec<SkippedImage>,
    pub monitor: MonitorHandle,
}

impl Session {
    /// Load models, enroll `label` from `images`, and spawn the monitor.
    ///
    /// Model loading is a hard barrier: if it fails, no reference image is
    /// fetched and no frame is analyzed.
    pub async fn start(
        collaborators: Collaborators,
        label: &str,
        images: &[ReferenceImage],
        config: MonitorConfig,
    ) -> Result<Session, SessionError> {
        config.validate()?;

        let loaded = collaborators.models.load_models().await?;
        tracing::info!(models = ?loaded, "models loaded");
        collaborators
            .notifier
            .notify(MODELS_LOADED, config.notify_duration);

        let report = EnrollmentBuilder::new(
            Arc::clone(&collaborators.references),
            Arc::clone(&collaborators.analyzer),
            Arc::clone(&collaborators.notifier),
        )
        .with_notify_duration(config.notify_duration)
        .build_report(label, images)
        .await;

        let monitor = AttendanceMonitor::new(
            config,
            &report.profile,
            collaborators.source,
            collaborators.analyzer,
            collaborators.notifier,
        )?;
        tracing::info!(session = %monitor.session(), label, "monitor session created");

        Ok(Session {
            profile: report.profile,
            skipped: report.skipped,
            monitor: monitor.spawn(),
        })
    }
}
