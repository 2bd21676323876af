//! Frame source abstraction over capture devices.
//!
//! A source hands out at most one open [`CaptureHandle`] at a time and
//! produces frames against it until released. Real hardware, still images
//! and scripted mocks all sit behind the same trait so the scan loop never
//! knows which one it is driving.

use super::{CaptureConfig, Facing, Frame};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during capture operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("camera access denied: {0}")]
    PermissionDenied(String),
    #[error("no matching camera available: {0}")]
    DeviceUnavailable(String),
    #[error("capture handle already released")]
    HandleClosed,
    #[error("capture stream failed: {0}")]
    StreamFailed(String),
}

/// Constraints passed to [`FrameSource::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Requested camera direction.
    pub facing: Facing,
    /// Preferred frame width in pixels.
    pub width: u32,
    /// Preferred frame height in pixels.
    pub height: u32,
    /// Target frames per second.
    pub fps: u32,
    /// Explicit device index, bypassing facing-based selection.
    pub device_id: Option<u32>,
}

impl CaptureRequest {
    /// Builds a request from capture configuration with an explicit facing.
    pub fn from_config(config: &CaptureConfig, facing: Facing) -> Self {
        Self {
            facing,
            width: config.width,
            height: config.height,
            fps: config.fps,
            device_id: config.device_id,
        }
    }
}

impl Default for CaptureRequest {
    fn default() -> Self {
        let config = CaptureConfig::default();
        Self::from_config(&config, config.facing)
    }
}

/// An open capture stream.
///
/// Only the session task holds a handle; it is never shared.
#[derive(Debug)]
pub struct CaptureHandle {
    id: Uuid,
    request: CaptureRequest,
    open: bool,
}

impl CaptureHandle {
    /// Creates an open handle for the given request.
    pub fn open(request: CaptureRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            open: true,
        }
    }

    /// Unique handle identifier, used in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The constraints this handle was opened with.
    pub fn request(&self) -> &CaptureRequest {
        &self.request
    }

    /// Returns true until the handle is closed.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Marks the handle closed. Returns true only for the call that
    /// actually closed it, so release implementations stay idempotent.
    pub fn close(&mut self) -> bool {
        std::mem::replace(&mut self.open, false)
    }

    /// Fails with [`CaptureError::HandleClosed`] once released.
    pub fn ensure_open(&self) -> Result<(), CaptureError> {
        if self.open {
            Ok(())
        } else {
            Err(CaptureError::HandleClosed)
        }
    }
}

/// A provider of live frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Opens the device with the given constraints.
    async fn acquire(&mut self, request: &CaptureRequest) -> Result<CaptureHandle, CaptureError>;

    /// Returns the most recent frame, suspending until the stream has
    /// produced one.
    async fn next_frame(&mut self, handle: &CaptureHandle) -> Result<Frame, CaptureError>;

    /// Stops the stream and frees device resources. A no-op for a handle
    /// that is already closed.
    async fn release(&mut self, handle: &mut CaptureHandle);
}

#[async_trait]
impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    async fn acquire(&mut self, request: &CaptureRequest) -> Result<CaptureHandle, CaptureError> {
        (**self).acquire(request).await
    }

    async fn next_frame(&mut self, handle: &CaptureHandle) -> Result<Frame, CaptureError> {
        (**self).next_frame(handle).await
    }

    async fn release(&mut self, handle: &mut CaptureHandle) {
        (**self).release(handle).await
    }
}
