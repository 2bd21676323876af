//! Frame source backed by a single image file.
//!
//! Useful for scanning a saved photo or screenshot through the same
//! session machinery as a live camera: the image stands in for a stream
//! that keeps showing the same picture.

use super::{CaptureError, CaptureHandle, CaptureRequest, Frame, FrameSource};
use async_trait::async_trait;
use std::path::PathBuf;

/// Serves one decoded image as an endless stream.
#[derive(Debug)]
pub struct StillImageSource {
    path: PathBuf,
    /// Decoded luma image, loaded on acquire and dropped on release.
    loaded: Option<(Vec<u8>, u32, u32)>,
    sequence: u64,
}

impl StillImageSource {
    /// Creates a source for the image at `path`. Nothing is read until
    /// [`FrameSource::acquire`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            loaded: None,
            sequence: 0,
        }
    }
}

#[async_trait]
impl FrameSource for StillImageSource {
    async fn acquire(&mut self, request: &CaptureRequest) -> Result<CaptureHandle, CaptureError> {
        let path = self.path.clone();
        let decoded = tokio::task::spawn_blocking(move || image::open(&path))
            .await
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
            .map_err(|e| {
                CaptureError::DeviceUnavailable(format!("{}: {}", self.path.display(), e))
            })?;

        let luma = decoded.to_luma8();
        let (width, height) = luma.dimensions();
        tracing::info!(
            path = %self.path.display(),
            width,
            height,
            "Still image loaded as capture stream"
        );

        self.loaded = Some((luma.into_raw(), width, height));
        self.sequence = 0;
        Ok(CaptureHandle::open(*request))
    }

    async fn next_frame(&mut self, handle: &CaptureHandle) -> Result<Frame, CaptureError> {
        handle.ensure_open()?;
        let (pixels, width, height) = self.loaded.as_ref().ok_or(CaptureError::HandleClosed)?;
        self.sequence += 1;
        Ok(Frame::new(pixels.clone(), *width, *height, self.sequence))
    }

    async fn release(&mut self, handle: &mut CaptureHandle) {
        if handle.close() {
            self.loaded = None;
            tracing::debug!(path = %self.path.display(), "Still image released");
        }
    }
}
