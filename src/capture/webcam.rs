//! Live camera capture via `nokhwa`.
//!
//! The device is opened and read on a dedicated OS thread, since camera
//! backends block and are not guaranteed to be `Send`. The thread publishes
//! each decoded frame into a `watch` channel; readers always see the latest
//! frame and never build a backlog.

use super::{CaptureError, CaptureHandle, CaptureRequest, Facing, Frame, FrameSource};
use async_trait::async_trait;
use nokhwa::pixel_format::LumaFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::{Camera, NokhwaError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{oneshot, watch};

/// Device name fragments that suggest a camera's direction.
const BACK_HINTS: &[&str] = &["back", "rear", "environment", "world"];
const FRONT_HINTS: &[&str] = &["front", "user", "facetime", "integrated"];

/// What the capture thread last published.
#[derive(Debug, Clone)]
enum StreamSlot {
    Pending,
    Frame(Frame),
    Failed(String),
}

#[derive(Debug)]
struct Worker {
    stop: Arc<AtomicBool>,
    frames: watch::Receiver<StreamSlot>,
    thread: Option<JoinHandle<()>>,
    /// Sequence of the last frame handed out.
    delivered: u64,
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Unjoined threads see the flag and close the device on their own.
        self.stop.store(true, Ordering::Release);
    }
}

/// A physical camera.
///
/// Dropping the source without a release still stops the capture thread.
#[derive(Debug, Default)]
pub struct WebcamSource {
    worker: Option<Worker>,
}

impl WebcamSource {
    /// Creates an idle source. The device is opened by `acquire`.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FrameSource for WebcamSource {
    async fn acquire(&mut self, request: &CaptureRequest) -> Result<CaptureHandle, CaptureError> {
        if self.worker.is_some() {
            return Err(CaptureError::DeviceUnavailable(
                "camera already streaming for another handle".into(),
            ));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (frames_tx, frames_rx) = watch::channel(StreamSlot::Pending);
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_stop = Arc::clone(&stop);
        let thread_request = *request;
        let thread = std::thread::Builder::new()
            .name("qr-scan-capture".into())
            .spawn(move || run_capture(thread_request, thread_stop, frames_tx, ready_tx))
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        let thread = await_ready(ready_rx, thread).await?;

        self.worker = Some(Worker {
            stop,
            frames: frames_rx,
            thread: Some(thread),
            delivered: 0,
        });
        Ok(CaptureHandle::open(*request))
    }

    async fn next_frame(&mut self, handle: &CaptureHandle) -> Result<Frame, CaptureError> {
        handle.ensure_open()?;
        let worker = self.worker.as_mut().ok_or(CaptureError::HandleClosed)?;

        loop {
            {
                let slot = worker.frames.borrow_and_update();
                match &*slot {
                    StreamSlot::Frame(frame) if frame.sequence() > worker.delivered => {
                        worker.delivered = frame.sequence();
                        return Ok(frame.clone());
                    }
                    StreamSlot::Failed(reason) => {
                        return Err(CaptureError::StreamFailed(reason.clone()))
                    }
                    _ => {}
                }
            }
            if worker.frames.changed().await.is_err() {
                return Err(CaptureError::HandleClosed);
            }
        }
    }

    async fn release(&mut self, handle: &mut CaptureHandle) {
        if !handle.close() {
            return;
        }
        let Some(mut worker) = self.worker.take() else {
            return;
        };

        worker.stop.store(true, Ordering::Release);
        if let Some(thread) = worker.thread.take() {
            if tokio::task::spawn_blocking(move || thread.join()).await.is_err() {
                tracing::warn!(handle = %handle.id(), "Capture thread did not shut down cleanly");
            }
        }
        tracing::info!(handle = %handle.id(), "Camera released");
    }
}

/// Waits for the capture thread to report whether the device opened. On
/// failure the thread is joined before the error is returned.
async fn await_ready(
    ready: oneshot::Receiver<Result<(), CaptureError>>,
    thread: JoinHandle<()>,
) -> Result<JoinHandle<()>, CaptureError> {
    let opened = ready.await.unwrap_or_else(|_| {
        Err(CaptureError::DeviceUnavailable(
            "capture thread exited before opening the device".into(),
        ))
    });
    match opened {
        Ok(()) => Ok(thread),
        Err(e) => {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
            Err(e)
        }
    }
}

fn run_capture(
    request: CaptureRequest,
    stop: Arc<AtomicBool>,
    frames: watch::Sender<StreamSlot>,
    ready: oneshot::Sender<Result<(), CaptureError>>,
) {
    let mut camera = match open_camera(&request) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        let _ = camera.stop_stream();
        return;
    }

    let mut sequence = 0u64;
    while !stop.load(Ordering::Acquire) {
        match camera.frame().and_then(|buffer| buffer.decode_image::<LumaFormat>()) {
            Ok(image) => {
                sequence += 1;
                let (width, height) = image.dimensions();
                frames.send_replace(StreamSlot::Frame(Frame::new(
                    image.into_raw(),
                    width,
                    height,
                    sequence,
                )));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Camera stream failed");
                frames.send_replace(StreamSlot::Failed(e.to_string()));
                break;
            }
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!(error = %e, "Failed to stop camera stream");
    }
    tracing::debug!(frames = sequence, "Capture thread exiting");
}

fn open_camera(request: &CaptureRequest) -> Result<Camera, CaptureError> {
    let index = select_device(request)?;
    let format = RequestedFormat::new::<LumaFormat>(RequestedFormatType::Closest(
        CameraFormat::new(
            Resolution::new(request.width, request.height),
            FrameFormat::MJPEG,
            request.fps,
        ),
    ));

    let mut camera = Camera::new(index, format).map_err(classify)?;
    camera.open_stream().map_err(classify)?;
    tracing::info!(
        device = %camera.info().human_name(),
        facing = %request.facing,
        "Camera opened"
    );
    Ok(camera)
}

fn select_device(request: &CaptureRequest) -> Result<CameraIndex, CaptureError> {
    if let Some(id) = request.device_id {
        return Ok(CameraIndex::Index(id));
    }

    let devices = nokhwa::query(ApiBackend::Auto).map_err(classify)?;
    let hints = match request.facing {
        Facing::Back => BACK_HINTS,
        Facing::Front => FRONT_HINTS,
    };

    // Most desktop cameras carry no direction in their name; fall back to
    // the first device rather than refusing.
    devices
        .iter()
        .find(|info| {
            let name = info.human_name().to_ascii_lowercase();
            hints.iter().any(|hint| name.contains(hint))
        })
        .or_else(|| devices.first())
        .map(|info| info.index().clone())
        .ok_or_else(|| CaptureError::DeviceUnavailable("no cameras detected".into()))
}

fn classify(error: NokhwaError) -> CaptureError {
    let message = error.to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        CaptureError::PermissionDenied(message)
    } else {
        CaptureError::DeviceUnavailable(message)
    }
}
