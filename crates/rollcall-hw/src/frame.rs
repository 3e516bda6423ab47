//! Raw buffer conversions and the dark-frame check.

use rollcall_core::Frame;

/// Fraction of near-black pixels above which a frame counts as dark.
pub(crate) const DARK_FRACTION: f32 = 0.95;

/// Pixels below this value land in the darkest histogram bucket.
const DARK_LEVEL: u8 = 32;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("buffer too short for {format}: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Build a core [`Frame`] from grayscale pixels and flag it if it is dark.
pub fn grayscale_frame(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Frame {
    let is_dark = is_dark_frame(&data, DARK_FRACTION);
    let mut frame = Frame::new(data, width, height, sequence);
    frame.is_dark = is_dark;
    frame
}

/// Y channel of packed YUYV 4:2:2 (`[Y0, U, Y1, V]` per two pixels).
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            format: "YUYV",
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// High byte of each 16-bit little-endian sample.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if y16.len() < expected {
        return Err(FrameError::InvalidLength {
            format: "Y16",
            expected,
            actual: y16.len(),
        });
    }
    Ok(y16[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

/// Plain 8-bit grayscale, trimmed to `width * height`.
pub fn grey_to_grayscale(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    if grey.len() < expected {
        return Err(FrameError::InvalidLength {
            format: "GREY",
            expected,
            actual: grey.len(),
        });
    }
    Ok(grey[..expected].to_vec())
}

/// True if more than `threshold` of the pixels sit in the darkest bucket.
/// An empty buffer is dark.
pub fn is_dark_frame(gray: &[u8], threshold: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < DARK_LEVEL).count();
    (dark as f32 / gray.len() as f32) > threshold
}
