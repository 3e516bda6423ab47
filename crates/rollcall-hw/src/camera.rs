//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, FrameError};
use async_trait::async_trait;
use rollcall_core::{Frame, FrameSource, SourceError};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
/// Raw captures tried per sample before settling for a dark frame.
const CAPTURE_ATTEMPTS: usize = 3;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("device cannot capture video")]
    StreamingNotSupported,
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl From<CameraError> for SourceError {
    fn from(err: CameraError) -> Self {
        match err {
            CameraError::DeviceNotFound(_)
            | CameraError::DeviceBusy
            | CameraError::StreamingNotSupported => SourceError::Unavailable(err.to_string()),
            CameraError::Frame(_) => SourceError::Decode(err.to_string()),
            _ => SourceError::Capture(err.to_string()),
        }
    }
}

/// Pixel layouts the camera may negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, Y channel kept.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }

    fn to_grayscale(self, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
        match self {
            Self::Yuyv => frame::yuyv_to_grayscale(buf, width, height),
            Self::Grey => frame::grey_to_grayscale(buf, width, height),
            Self::Y16 => frame::y16_to_grayscale(buf, width, height),
        }
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a capture device by path (e.g. "/dev/video0") and negotiate a format.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("busy") || msg.contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {msg}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }
        tracing::info!(device = device_path, driver = %caps.driver, card = %caps.card, "opened camera");

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = CAPTURE_WIDTH;
        fmt.height = CAPTURE_HEIGHT;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;
        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, or Y16)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            format = ?pixel_format,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    fn stream(&self) -> Result<MmapStream<'_>, CameraError> {
        MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))
    }

    /// Capture one grayscale frame, skipping dark buffers (IR emitter off,
    /// exposure still settling) for up to [`CAPTURE_ATTEMPTS`] reads.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let mut stream = self.stream()?;
        first_lit((0..CAPTURE_ATTEMPTS).map(|_| {
            let (buf, meta) = stream
                .next()
                .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
            let gray = self.pixel_format.to_grayscale(buf, self.width, self.height)?;
            Ok(frame::grayscale_frame(gray, self.width, self.height, meta.sequence))
        }))
    }

    /// Read and discard `frames` buffers so auto-exposure can settle.
    pub fn warm_up(&self, frames: usize) -> Result<(), CameraError> {
        if frames == 0 {
            return Ok(());
        }
        let mut stream = self.stream()?;
        for _ in 0..frames {
            stream
                .next()
                .map_err(|e| CameraError::CaptureFailed(format!("warm-up capture: {e}")))?;
        }
        tracing::debug!(frames, device = %self.device_path, "camera warmed up");
        Ok(())
    }
}

/// First non-dark frame of `captures`, or the last dark one if every
/// capture was dark. Stops at the first error.
fn first_lit(
    captures: impl IntoIterator<Item = Result<Frame, CameraError>>,
) -> Result<Frame, CameraError> {
    let mut last_dark = None;
    for capture in captures {
        let frame = capture?;
        if !frame.is_dark {
            return Ok(frame);
        }
        tracing::debug!(seq = frame.sequence, "skipping dark frame");
        last_dark = Some(frame);
    }
    last_dark.ok_or_else(|| CameraError::CaptureFailed("no frames captured".into()))
}

/// [`FrameSource`] over a V4L2 camera. Capture runs on the blocking pool.
pub struct CameraSource {
    camera: Arc<Mutex<Camera>>,
}

impl CameraSource {
    /// Open `device_path` and discard `warmup_frames` before the first sample.
    pub async fn open(device_path: &str, warmup_frames: usize) -> Result<Self, CameraError> {
        let path = device_path.to_string();
        let camera = tokio::task::spawn_blocking(move || {
            let camera = Camera::open(&path)?;
            camera.warm_up(warmup_frames)?;
            Ok::<_, CameraError>(camera)
        })
        .await
        .map_err(|e| CameraError::CaptureFailed(format!("camera open task failed: {e}")))??;

        Ok(Self {
            camera: Arc::new(Mutex::new(camera)),
        })
    }
}

#[async_trait]
impl FrameSource for CameraSource {
    async fn current_frame(&self) -> Result<Frame, SourceError> {
        let camera = Arc::clone(&self.camera);
        tokio::task::spawn_blocking(move || -> Result<Frame, SourceError> {
            let camera = camera
                .lock()
                .map_err(|_| SourceError::Capture("camera lock poisoned".into()))?;
            Ok(camera.capture_frame()?)
        })
        .await
        .map_err(|e| SourceError::Capture(format!("capture task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"Y16 ")), Some(PixelFormat::Y16));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_pixel_format_conversion() {
        let gray = PixelFormat::Yuyv.to_grayscale(&[10, 0, 20, 0], 2, 1).unwrap();
        assert_eq!(gray, vec![10, 20]);
        assert!(PixelFormat::Grey.to_grayscale(&[1], 2, 1).is_err());
    }

    #[test]
    fn test_missing_device() {
        let err = Camera::open("/dev/rollcall-does-not-exist").err().unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
        assert!(matches!(SourceError::from(err), SourceError::Unavailable(_)));
    }

    fn captured(value: u8, sequence: u32) -> Result<Frame, CameraError> {
        Ok(frame::grayscale_frame(vec![value; 16], 4, 4, sequence))
    }

    #[test]
    fn test_first_lit_skips_dark_buffers() {
        let frame = first_lit([captured(2, 0), captured(5, 1), captured(140, 2)]).unwrap();
        assert_eq!(frame.sequence, 2);
        assert!(!frame.is_dark);
    }

    #[test]
    fn test_first_lit_stops_reading_after_a_lit_frame() {
        let mut reads = 0;
        let frame = first_lit((0..CAPTURE_ATTEMPTS as u32).map(|seq| {
            reads += 1;
            captured(200, seq)
        }))
        .unwrap();
        assert_eq!(frame.sequence, 0);
        assert_eq!(reads, 1);
    }

    #[test]
    fn test_first_lit_all_dark_keeps_last() {
        let frame = first_lit([captured(0, 7), captured(1, 8), captured(3, 9)]).unwrap();
        assert_eq!(frame.sequence, 9);
        assert!(frame.is_dark);
    }

    #[test]
    fn test_first_lit_propagates_capture_errors() {
        let err = first_lit([
            captured(0, 0),
            Err(CameraError::CaptureFailed("dequeue".into())),
            captured(200, 2),
        ])
        .unwrap_err();
        assert!(matches!(err, CameraError::CaptureFailed(_)));

        let empty = first_lit(std::iter::empty()).unwrap_err();
        assert!(matches!(empty, CameraError::CaptureFailed(_)));
    }

    #[test]
    fn test_short_buffer_is_decode_error() {
        let err = CameraError::from(frame::yuyv_to_grayscale(&[], 2, 2).unwrap_err());
        assert!(matches!(SourceError::from(err), SourceError::Decode(_)));
    }
}
