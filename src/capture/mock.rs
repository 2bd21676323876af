//! Scriptable in-memory frame source for tests and demos.

use super::{CaptureError, CaptureHandle, CaptureRequest, Frame, FrameSource};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Call counters shared between a [`MockFrameSource`] and the test that
/// built it, so they stay readable after the source moves into a session.
#[derive(Debug, Default)]
pub struct MockStats {
    acquire_calls: AtomicU64,
    frame_requests: AtomicU64,
    frames_delivered: AtomicU64,
    release_calls: AtomicU64,
    streams_stopped: AtomicU64,
}

impl MockStats {
    /// Number of `acquire` calls.
    pub fn acquire_calls(&self) -> u64 {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    /// Number of `next_frame` calls, including ones that never resolved.
    pub fn frame_requests(&self) -> u64 {
        self.frame_requests.load(Ordering::SeqCst)
    }

    /// Number of frames actually returned.
    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::SeqCst)
    }

    /// Number of `release` calls, including no-op ones.
    pub fn release_calls(&self) -> u64 {
        self.release_calls.load(Ordering::SeqCst)
    }

    /// Number of releases that actually stopped an open stream.
    pub fn streams_stopped(&self) -> u64 {
        self.streams_stopped.load(Ordering::SeqCst)
    }
}

/// Mock source that generates synthetic frames.
///
/// By default it opens successfully and produces an endless stream of
/// patterned frames at the requested resolution. Builder methods script
/// the failure paths.
#[derive(Debug, Default)]
pub struct MockFrameSource {
    acquire_error: Option<CaptureError>,
    /// Frames delivered before the stream goes quiet forever.
    stall_after: Option<u64>,
    /// Frames delivered before `next_frame` fails with the given error.
    fail_after: Option<(u64, CaptureError)>,
    sequence: u64,
    stats: Arc<MockStats>,
}

impl MockFrameSource {
    /// Creates a source that always opens and always has frames.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `acquire` fail as if the user refused camera access.
    pub fn deny_permission(mut self) -> Self {
        self.acquire_error = Some(CaptureError::PermissionDenied(
            "user dismissed the camera prompt".into(),
        ));
        self
    }

    /// Makes `acquire` fail as if no camera matched the request.
    pub fn without_device(mut self) -> Self {
        self.acquire_error = Some(CaptureError::DeviceUnavailable(
            "no camera matches the requested facing".into(),
        ));
        self
    }

    /// Delivers `frames` frames, then suspends every `next_frame` forever.
    pub fn stall_after(mut self, frames: u64) -> Self {
        self.stall_after = Some(frames);
        self
    }

    /// Delivers `frames` frames, then fails every `next_frame` with `error`.
    pub fn fail_after(mut self, frames: u64, error: CaptureError) -> Self {
        self.fail_after = Some((frames, error));
        self
    }

    /// Returns the shared call counters.
    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }

    fn synthesize(&mut self, request: &CaptureRequest) -> Frame {
        let (width, height) = (request.width, request.height);
        let shift = self.sequence;
        // Diagonal gradient that drifts each frame; never contains a code.
        let pixels = (0..height)
            .flat_map(|y| (0..width).map(move |x| ((x as u64 + y as u64 + shift) % 256) as u8))
            .collect();
        self.sequence += 1;
        Frame::new(pixels, width, height, self.sequence)
    }
}

#[async_trait]
impl FrameSource for MockFrameSource {
    async fn acquire(&mut self, request: &CaptureRequest) -> Result<CaptureHandle, CaptureError> {
        self.stats.acquire_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.acquire_error {
            return Err(error.clone());
        }
        self.sequence = 0;
        tracing::info!(facing = %request.facing, width = request.width, height = request.height, "MockFrameSource opened");
        Ok(CaptureHandle::open(*request))
    }

    async fn next_frame(&mut self, handle: &CaptureHandle) -> Result<Frame, CaptureError> {
        self.stats.frame_requests.fetch_add(1, Ordering::SeqCst);
        handle.ensure_open()?;

        if let Some((limit, error)) = &self.fail_after {
            if self.sequence >= *limit {
                return Err(error.clone());
            }
        }
        if let Some(limit) = self.stall_after {
            if self.sequence >= limit {
                std::future::pending::<()>().await;
            }
        }

        let frame = self.synthesize(handle.request());
        self.stats.frames_delivered.fetch_add(1, Ordering::SeqCst);
        Ok(frame)
    }

    async fn release(&mut self, handle: &mut CaptureHandle) {
        self.stats.release_calls.fetch_add(1, Ordering::SeqCst);
        if handle.close() {
            self.stats.streams_stopped.fetch_add(1, Ordering::SeqCst);
            tracing::info!(handle = %handle.id(), "MockFrameSource closed");
        }
    }
}
