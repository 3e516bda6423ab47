//! rollcall-core — Attendance decisions for a single enrolled face.
//!
//! Builds an enrolled profile from reference images, then samples a frame
//! source on a fixed interval and tracks how many consecutive samples went
//! by without the enrolled person in view. Frames, face analysis, model
//! loading and notifications come in through the traits in [`capability`].

pub mod capability;
pub mod enrollment;
pub mod matcher;
pub mod monitor;
pub mod policy;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;

pub use capability::{
    AnalyzerError, DetectOptions, FaceAnalyzer, FrameSource, ModelLoadError, ModelLoader,
    Notifier, ReferenceError, ReferenceLoader, SourceError, TracingNotifier,
};
pub use enrollment::{EnrollmentBuilder, EnrollmentReport};
pub use matcher::FaceMatcher;
pub use monitor::{
    AttendanceMonitor, MonitorConfig, MonitorHandle, MonitorSnapshot, Stopper, TickReport,
};
pub use policy::{AlertMode, MonitorPhase, MonitorState, TickOutcome};
pub use session::{Collaborators, Session, SessionError};
pub use types::{
    BoundingBox, DetectedFace, Embedding, EnrolledProfile, ExpressionScores, Frame, MatchLabel,
    MatchResult, Observation, ReferenceImage,
};
