//! The sample-detect cycle.
//!
//! One [`ScanLoop`] runs inside one task. Every wait (pacing timer, frame
//! source, detector) is an explicit `await` raced against the session's
//! cancellation token, so a stop is observed at the next suspension point
//! and at most one detection is ever in flight.

use super::{FailureReason, LoopState, ScanProgress};
use crate::capture::{CaptureHandle, FrameSource};
use crate::detect::{CodeDetector, DetectionResult, Quad};
use crate::metrics::ScanMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Why the loop entered `Stopped`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopCause {
    /// The session's stop signal fired.
    Cancelled,
    /// The source reported the handle closed underneath us.
    HandleClosed,
    /// Frame retrieval or detection failed.
    Failed(FailureReason),
}

/// How the loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopExit {
    /// Terminal `Done`.
    Found {
        /// Decoded payload.
        payload: String,
        /// Location of the code in the winning frame.
        quad: Quad,
    },
    /// Terminal `Stopped`.
    Stopped(StopCause),
}

/// Final accounting for a finished loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopReport {
    /// How the loop ended.
    pub exit: LoopExit,
    /// Detection attempts made.
    pub attempts: u64,
    /// Frames pulled from the source.
    pub frames: u64,
    /// Wall time from start to exit.
    pub elapsed: Duration,
}

/// Drives frames from a source through a detector until something is
/// found or the loop is stopped.
pub struct ScanLoop {
    detector: Arc<dyn CodeDetector>,
    cancel: CancellationToken,
    interval: Option<Duration>,
    metrics: Option<Arc<ScanMetrics>>,
    state: watch::Sender<LoopState>,
    progress: watch::Sender<ScanProgress>,
    current: LoopState,
    attempts: u64,
    frames: u64,
    started: Instant,
}

impl ScanLoop {
    /// Creates an idle loop that stops when `cancel` fires.
    pub fn new(detector: Arc<dyn CodeDetector>, cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        let (progress, _) = watch::channel(ScanProgress::default());
        Self {
            detector,
            cancel,
            interval: None,
            metrics: None,
            state,
            progress,
            current: LoopState::Idle,
            attempts: 0,
            frames: 0,
            started: Instant::now(),
        }
    }

    /// Waits at least `interval` between frame samples.
    pub fn with_interval(mut self, interval: Option<Duration>) -> Self {
        self.interval = interval;
        self
    }

    /// Records attempts and frames into `metrics`.
    pub fn with_metrics(mut self, metrics: Option<Arc<ScanMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Subscribes to state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Subscribes to progress snapshots.
    pub fn subscribe_progress(&self) -> watch::Receiver<ScanProgress> {
        self.progress.subscribe()
    }

    /// Runs the loop to completion against an open handle.
    ///
    /// The handle is only borrowed: releasing it is the caller's job, on
    /// every exit path.
    pub async fn run<S>(mut self, source: &mut S, handle: &CaptureHandle) -> LoopReport
    where
        S: FrameSource + ?Sized,
    {
        let cancel = self.cancel.clone();
        self.started = Instant::now();
        let mut pacing = self.interval.map(|period| {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        self.advance(LoopState::AwaitingFrame);

        let exit = loop {
            if cancel.is_cancelled() {
                break LoopExit::Stopped(StopCause::Cancelled);
            }

            if let Some(ticker) = pacing.as_mut() {
                let ticked = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => false,
                    _ = ticker.tick() => true,
                };
                if !ticked {
                    break LoopExit::Stopped(StopCause::Cancelled);
                }
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                frame = source.next_frame(handle) => Some(frame),
            };
            let frame = match next {
                None => break LoopExit::Stopped(StopCause::Cancelled),
                Some(Ok(frame)) => frame,
                Some(Err(error)) => match FailureReason::from_capture(error) {
                    Some(reason) => {
                        tracing::warn!(%reason, "Frame retrieval failed");
                        break LoopExit::Stopped(StopCause::Failed(reason));
                    }
                    None => break LoopExit::Stopped(StopCause::HandleClosed),
                },
            };

            self.frames += 1;
            if let Some(metrics) = &self.metrics {
                metrics.record_frame();
            }
            self.advance(LoopState::Detecting);
            self.attempts += 1;

            let sequence = frame.sequence();
            tracing::trace!(
                sequence,
                age_ms = frame.captured_at().elapsed().as_millis() as u64,
                "Frame sampled"
            );
            let detector = Arc::clone(&self.detector);
            let detect_started = Instant::now();
            let task = tokio::task::spawn_blocking(move || detector.detect(&frame));
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                joined = task => Some(joined),
            };
            let result = match joined {
                None => break LoopExit::Stopped(StopCause::Cancelled),
                Some(Ok(result)) => result,
                Some(Err(e)) => {
                    tracing::error!(error = %e, sequence, "Detector crashed");
                    break LoopExit::Stopped(StopCause::Failed(
                        FailureReason::DetectorUnavailable(format!("detector crashed: {e}")),
                    ));
                }
            };
            if let Some(metrics) = &self.metrics {
                metrics.record_attempt(detect_started.elapsed());
            }

            // A result that lands after a stop is discarded.
            if cancel.is_cancelled() {
                break LoopExit::Stopped(StopCause::Cancelled);
            }

            match result {
                DetectionResult::Found { payload, quad } => {
                    tracing::debug!(attempt = self.attempts, sequence, "Code found");
                    self.advance(LoopState::Done);
                    break LoopExit::Found { payload, quad };
                }
                DetectionResult::NotFound => {
                    tracing::trace!(attempt = self.attempts, sequence, "No code in frame");
                    self.advance(LoopState::AwaitingFrame);
                }
            }
        };

        if let LoopExit::Stopped(cause) = &exit {
            tracing::debug!(?cause, attempts = self.attempts, "Scan loop stopped");
            self.advance(LoopState::Stopped);
        }

        LoopReport {
            exit,
            attempts: self.attempts,
            frames: self.frames,
            elapsed: self.started.elapsed(),
        }
    }

    fn advance(&mut self, next: LoopState) {
        if !self.current.can_advance_to(next) {
            debug_assert!(false, "illegal transition {} -> {}", self.current, next);
            tracing::error!(from = %self.current, to = %next, "Illegal scan loop transition");
            return;
        }
        tracing::debug!(from = %self.current, to = %next, "Scan loop transition");
        self.current = next;
        self.state.send_replace(next);
        self.progress.send_replace(ScanProgress {
            attempts: self.attempts,
            frames: self.frames,
            elapsed: self.started.elapsed(),
            state: next,
        });
    }
}

impl std::fmt::Debug for ScanLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanLoop")
            .field("state", &self.current)
            .field("attempts", &self.attempts)
            .field("frames", &self.frames)
            .field("interval", &self.interval)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
