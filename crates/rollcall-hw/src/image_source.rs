//! Image-file readers: a snapshot [`FrameSource`] and the reference-image loader.

use crate::frame;
use async_trait::async_trait;
use rollcall_core::{Frame, FrameSource, ReferenceError, ReferenceImage, ReferenceLoader, SourceError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

/// Decode any format the `image` crate knows into 8-bit luma.
fn decode_luma(path: &Path) -> Result<(Vec<u8>, u32, u32), image::ImageError> {
    let gray = image::open(path)?.to_luma8();
    let (width, height) = gray.dimensions();
    Ok((gray.into_raw(), width, height))
}

/// Re-reads one image file on every sample, for cameras that publish
/// stills (or for replaying a recording frame by frame).
pub struct SnapshotSource {
    path: PathBuf,
    sequence: AtomicU32,
}

impl SnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sequence: AtomicU32::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FrameSource for SnapshotSource {
    async fn current_frame(&self) -> Result<Frame, SourceError> {
        let path = self.path.clone();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        tokio::task::spawn_blocking(move || -> Result<Frame, SourceError> {
            if !path.exists() {
                return Err(SourceError::Unavailable(path.display().to_string()));
            }
            let (data, width, height) = decode_luma(&path)
                .map_err(|e| SourceError::Decode(format!("{}: {e}", path.display())))?;
            Ok(frame::grayscale_frame(data, width, height, sequence))
        })
        .await
        .map_err(|e| SourceError::Capture(format!("snapshot task failed: {e}")))?
    }
}

/// Where a reference image lives once its location string is parsed.
#[derive(Debug, PartialEq)]
enum Location {
    Disk(PathBuf),
    Remote(String),
}

/// Loads reference images from plain paths, `file://` URIs and
/// `http(s)://` URLs.
#[derive(Debug, Default, Clone)]
pub struct ImageLoader {
    client: reqwest::Client,
}

impl ImageLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (timeouts, proxies, ...).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn resolve(location: &str) -> Result<Location, ReferenceError> {
        if let Some(path) = location.strip_prefix("file://") {
            return Ok(Location::Disk(PathBuf::from(path)));
        }
        if location.starts_with("http://") || location.starts_with("https://") {
            return Ok(Location::Remote(location.to_string()));
        }
        if location.contains("://") {
            return Err(ReferenceError::UnsupportedLocation(location.to_string()));
        }
        Ok(Location::Disk(PathBuf::from(location)))
    }

    async fn load_file(path: PathBuf, location: String) -> Result<Frame, ReferenceError> {
        let task_location = location.clone();
        tokio::task::spawn_blocking(move || -> Result<Frame, ReferenceError> {
            if !path.is_file() {
                return Err(ReferenceError::NotFound(task_location));
            }
            let (data, width, height) =
                decode_luma(&path).map_err(|e| ReferenceError::Decode {
                    location: task_location,
                    reason: e.to_string(),
                })?;
            Ok(frame::grayscale_frame(data, width, height, 0))
        })
        .await
        .map_err(|e| ReferenceError::Decode {
            location,
            reason: format!("load task failed: {e}"),
        })?
    }

    async fn download(&self, url: &str) -> Result<Frame, ReferenceError> {
        let fetch_error = |reason: String| ReferenceError::Fetch {
            location: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ReferenceError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP {status}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        tracing::debug!(url, bytes = bytes.len(), "reference image downloaded");

        let location = url.to_string();
        let task_location = location.clone();
        tokio::task::spawn_blocking(move || -> Result<Frame, ReferenceError> {
            let gray = image::load_from_memory(&bytes)
                .map_err(|e| ReferenceError::Decode {
                    location: task_location,
                    reason: e.to_string(),
                })?
                .to_luma8();
            let (width, height) = gray.dimensions();
            Ok(frame::grayscale_frame(gray.into_raw(), width, height, 0))
        })
        .await
        .map_err(|e| ReferenceError::Decode {
            location,
            reason: format!("decode task failed: {e}"),
        })?
    }
}

#[async_trait]
impl ReferenceLoader for ImageLoader {
    async fn fetch(&self, image: &ReferenceImage) -> Result<Frame, ReferenceError> {
        match Self::resolve(image.location())? {
            Location::Disk(path) => Self::load_file(path, image.location().to_string()).await,
            Location::Remote(url) => self.download(&url).await,
        }
    }
}
