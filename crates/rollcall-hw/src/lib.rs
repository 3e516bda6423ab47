//! rollcall-hw — Frame sources for the attendance monitor.
//!
//! A V4L2 camera for live sampling, plus image-file readers used for
//! snapshot sampling and for loading enrollment reference images.

pub mod camera;
pub mod frame;
pub mod image_source;

pub use camera::{Camera, CameraError, CameraSource, PixelFormat};
pub use frame::FrameError;
pub use image_source::{ImageLoader, SnapshotSource};
pub use rollcall_core::Frame;
