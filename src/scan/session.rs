//! Scan sessions: one acquisition, one loop, one outcome, one release.
//!
//! Every "have we already reported" flag lives in a per-session
//! [`SessionControl`], so any number of sessions can run side by side.
//!
//! Teardown order is fixed: the outcome callback (if any) fires first, then
//! the capture handle is released, then [`SessionHandle::wait`] resolves.
//! A panicking callback is held until after release and then resumed from
//! `wait`.

use super::{FailureReason, LoopExit, LoopState, ScanLoop, ScanOutcome, ScanProgress, StopCause};
use crate::capture::{CaptureConfig, CaptureHandle, CaptureRequest, Facing, FrameSource, ScanConfig};
use crate::detect::DetectorProvider;
use crate::metrics::ScanMetrics;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

const RUNNING: u8 = 0;
const STOPPING: u8 = 1;
const SETTLED: u8 = 2;

/// Per-session arbitration between `stop` and outcome delivery. Whichever
/// moves the phase out of `RUNNING` first wins; the loser is a no-op.
#[derive(Debug)]
struct SessionControl {
    phase: AtomicU8,
    cancel: CancellationToken,
}

impl SessionControl {
    fn new() -> Self {
        Self {
            phase: AtomicU8::new(RUNNING),
            cancel: CancellationToken::new(),
        }
    }

    fn request_stop(&self) -> bool {
        let first = self
            .phase
            .compare_exchange(RUNNING, STOPPING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.cancel.cancel();
        }
        first
    }

    fn try_settle(&self) -> bool {
        self.phase
            .compare_exchange(RUNNING, SETTLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Success and failure callbacks. Consumed on delivery, so neither can
/// fire twice and at most one fires at all.
pub struct ScanCallbacks {
    on_success: Box<dyn FnOnce(String) + Send>,
    on_failure: Box<dyn FnOnce(FailureReason) + Send>,
}

impl ScanCallbacks {
    /// Wraps the two callbacks.
    pub fn new(
        on_success: impl FnOnce(String) + Send + 'static,
        on_failure: impl FnOnce(FailureReason) + Send + 'static,
    ) -> Self {
        Self {
            on_success: Box::new(on_success),
            on_failure: Box::new(on_failure),
        }
    }

    /// Callbacks that do nothing, for callers that only use
    /// [`SessionHandle::wait`].
    pub fn silent() -> Self {
        Self::new(|_| {}, |_| {})
    }

    fn deliver(self, outcome: &ScanOutcome) {
        match outcome {
            ScanOutcome::Success { payload } => (self.on_success)(payload.clone()),
            ScanOutcome::Failure { reason } => (self.on_failure)(reason.clone()),
            ScanOutcome::Cancelled => {}
        }
    }
}

impl std::fmt::Debug for ScanCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanCallbacks").finish_non_exhaustive()
    }
}

/// A configured, not yet started scan.
pub struct ScanSession<S> {
    id: Uuid,
    control: Arc<SessionControl>,
    source: S,
    detectors: Arc<dyn DetectorProvider>,
    capture: CaptureConfig,
    scan: ScanConfig,
    metrics: Option<Arc<ScanMetrics>>,
}

impl<S> ScanSession<S>
where
    S: FrameSource + 'static,
{
    /// Creates a session over `source`, building its detector from
    /// `detectors` once the camera is open.
    pub fn new(source: S, detectors: impl DetectorProvider + 'static) -> Self {
        Self {
            id: Uuid::new_v4(),
            control: Arc::new(SessionControl::new()),
            source,
            detectors: Arc::new(detectors),
            capture: CaptureConfig::default(),
            scan: ScanConfig::default(),
            metrics: None,
        }
    }

    /// Sets the preferred resolution and device.
    pub fn with_capture_config(mut self, capture: CaptureConfig) -> Self {
        self.capture = capture;
        self
    }

    /// Sets loop pacing.
    pub fn with_scan_config(mut self, scan: ScanConfig) -> Self {
        self.scan = scan;
        self
    }

    /// Records session and loop metrics into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<ScanMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Session identifier, the same one the started handle reports.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// A stop trigger usable before [`ScanSession::start`] returns, for
    /// example while a permission prompt holds up acquisition.
    pub fn stopper(&self) -> SessionStopper {
        SessionStopper {
            control: Arc::clone(&self.control),
        }
    }

    /// Opens the camera and starts scanning.
    ///
    /// If the camera cannot be opened, `on_failure` has already fired by
    /// the time this returns and nothing is released. Otherwise the loop
    /// runs on its own task until it finds a code, fails, or is stopped.
    ///
    /// A stop through [`ScanSession::stopper`] while the camera is still
    /// opening ends the session as cancelled; a handle that opened anyway
    /// is released before this returns.
    pub async fn start(self, facing: Facing, callbacks: ScanCallbacks) -> SessionHandle {
        let Self {
            id,
            control,
            mut source,
            detectors,
            capture,
            scan,
            metrics,
        } = self;

        let span = tracing::info_span!("scan_session", session = %id);
        if let Some(metrics) = &metrics {
            metrics.session_started();
        }

        let request = CaptureRequest::from_config(&capture, facing);
        span.in_scope(|| {
            tracing::info!(
                facing = %facing,
                width = request.width,
                height = request.height,
                "Starting scan session"
            )
        });

        // A stop during acquisition abandons the open attempt.
        let acquired = tokio::select! {
            biased;
            _ = control.cancel.cancelled() => None,
            acquired = source.acquire(&request).instrument(span.clone()) => Some(acquired),
        };
        let mut handle = match acquired {
            None => {
                span.in_scope(|| tracing::info!("Stopped while acquiring camera"));
                let outcome = ScanOutcome::Cancelled;
                finish(&span, &outcome, metrics.as_deref(), 0);
                return SessionHandle::finished(id, control, outcome);
            }
            Some(Ok(handle)) => handle,
            Some(Err(error)) => {
                let outcome = match FailureReason::from_capture(error) {
                    Some(reason) => ScanOutcome::Failure { reason },
                    None => ScanOutcome::Cancelled,
                };
                let settled = settle(&control, outcome, callbacks);
                finish(&span, settled.outcome(), metrics.as_deref(), 0);
                return SessionHandle::finished(id, control, settled.into_outcome());
            }
        };

        if control.cancel.is_cancelled() {
            source.release(&mut handle).instrument(span.clone()).await;
            let outcome = ScanOutcome::Cancelled;
            finish(&span, &outcome, metrics.as_deref(), 0);
            return SessionHandle::finished(id, control, outcome);
        }

        let detector = match detectors.load() {
            Ok(detector) => detector,
            Err(error) => {
                let settled = settle(
                    &control,
                    ScanOutcome::Failure {
                        reason: error.into(),
                    },
                    callbacks,
                );
                source.release(&mut handle).instrument(span.clone()).await;
                finish(&span, settled.outcome(), metrics.as_deref(), 0);
                return SessionHandle::finished(id, control, settled.into_outcome());
            }
        };

        let scan_loop = ScanLoop::new(detector, control.cancel.clone())
            .with_interval(scan.sample_interval())
            .with_metrics(metrics.clone());
        let state = scan_loop.subscribe_state();
        let progress = scan_loop.subscribe_progress();

        let task = tokio::spawn(
            drive(
                source,
                handle,
                scan_loop,
                Arc::clone(&control),
                callbacks,
                metrics,
                span.clone(),
            )
            .instrument(span),
        );

        SessionHandle {
            id,
            control,
            state,
            progress,
            task: Some(task),
            outcome: None,
        }
    }
}

impl<S> std::fmt::Debug for ScanSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("id", &self.id)
            .field("capture", &self.capture)
            .field("scan", &self.scan)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

async fn drive<S: FrameSource>(
    mut source: S,
    mut handle: CaptureHandle,
    scan_loop: ScanLoop,
    control: Arc<SessionControl>,
    callbacks: ScanCallbacks,
    metrics: Option<Arc<ScanMetrics>>,
    span: tracing::Span,
) -> ScanOutcome {
    let report = scan_loop.run(&mut source, &handle).await;

    let outcome = match report.exit {
        LoopExit::Found { payload, .. } => ScanOutcome::Success { payload },
        LoopExit::Stopped(StopCause::Failed(reason)) => ScanOutcome::Failure { reason },
        LoopExit::Stopped(StopCause::Cancelled | StopCause::HandleClosed) => {
            ScanOutcome::Cancelled
        }
    };
    let settled = settle(&control, outcome, callbacks);

    source.release(&mut handle).await;
    finish(&span, settled.outcome(), metrics.as_deref(), report.attempts);
    settled.into_outcome()
}

/// An outcome whose callback has run. Holds the callback's panic, if any,
/// until the handle has been released.
struct Settled {
    outcome: ScanOutcome,
    panic: Option<Box<dyn Any + Send>>,
}

impl Settled {
    fn outcome(&self) -> &ScanOutcome {
        &self.outcome
    }

    /// Returns the outcome, or resumes a callback panic.
    fn into_outcome(self) -> ScanOutcome {
        match self.panic {
            Some(payload) => panic::resume_unwind(payload),
            None => self.outcome,
        }
    }
}

/// Delivers `outcome` unless a stop got there first, in which case the
/// session is cancelled and nothing fires.
fn settle(control: &SessionControl, outcome: ScanOutcome, callbacks: ScanCallbacks) -> Settled {
    if !control.try_settle() {
        return Settled {
            outcome: ScanOutcome::Cancelled,
            panic: None,
        };
    }
    let panic = panic::catch_unwind(AssertUnwindSafe(|| callbacks.deliver(&outcome))).err();
    if panic.is_some() {
        tracing::error!(outcome = outcome.kind(), "Scan callback panicked");
    }
    Settled { outcome, panic }
}

fn finish(span: &tracing::Span, outcome: &ScanOutcome, metrics: Option<&ScanMetrics>, attempts: u64) {
    if let Some(metrics) = metrics {
        metrics.session_finished(outcome);
    }
    span.in_scope(|| match outcome {
        ScanOutcome::Failure { reason } => {
            tracing::warn!(%reason, attempts, "Scan session failed")
        }
        other => tracing::info!(outcome = other.kind(), attempts, "Scan session finished"),
    });
}

/// Clonable stop trigger, for signal handlers and timers.
#[derive(Debug, Clone)]
pub struct SessionStopper {
    control: Arc<SessionControl>,
}

impl SessionStopper {
    /// Requests a stop. Returns true only for the call that took effect.
    pub fn stop(&self) -> bool {
        self.control.request_stop()
    }
}

/// Handle to a started session.
///
/// Dropping the handle stops the session; the capture handle is still
/// released by the session task.
#[derive(Debug)]
pub struct SessionHandle {
    id: Uuid,
    control: Arc<SessionControl>,
    state: watch::Receiver<LoopState>,
    progress: watch::Receiver<ScanProgress>,
    task: Option<JoinHandle<ScanOutcome>>,
    /// Set when the session ended before a loop was started.
    outcome: Option<ScanOutcome>,
}

impl SessionHandle {
    fn finished(id: Uuid, control: Arc<SessionControl>, outcome: ScanOutcome) -> Self {
        Self {
            id,
            control,
            state: watch::channel(LoopState::Stopped).1,
            progress: watch::channel(ScanProgress {
                state: LoopState::Stopped,
                ..Default::default()
            })
            .1,
            task: None,
            outcome: Some(outcome),
        }
    }

    /// Session identifier, as it appears in log spans.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stops the session if it has not already produced an outcome.
    /// Returns true only for the call that took effect.
    pub fn stop(&self) -> bool {
        let first = self.control.request_stop();
        if first {
            tracing::info!(session = %self.id, "Scan session stop requested");
        }
        first
    }

    /// A stop trigger that can outlive or move away from this handle.
    pub fn stopper(&self) -> SessionStopper {
        SessionStopper {
            control: Arc::clone(&self.control),
        }
    }

    /// Current loop state.
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Receiver for loop state changes.
    pub fn state_updates(&self) -> watch::Receiver<LoopState> {
        self.state.clone()
    }

    /// Receiver for progress snapshots.
    pub fn progress(&self) -> watch::Receiver<ScanProgress> {
        self.progress.clone()
    }

    /// True once the outcome is known and the camera released.
    pub fn is_finished(&self) -> bool {
        self.outcome.is_some() || self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the outcome. Resolves only after the capture handle has
    /// been released.
    pub async fn wait(mut self) -> ScanOutcome {
        if let Some(outcome) = self.outcome.take() {
            return outcome;
        }
        let Some(task) = self.task.take() else {
            return ScanOutcome::Cancelled;
        };
        match task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => ScanOutcome::Cancelled,
        }
    }

    /// Stops the session and waits for teardown.
    pub async fn cancel(self) -> ScanOutcome {
        self.stop();
        self.wait().await
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.control.request_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureError, Frame, MockFrameSource};
    use crate::detect::{CodeDetector, DetectorError, Preloaded, ScriptedDetector};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::OnceLock;

    /// Source whose acquire never completes, like an unanswered permission
    /// prompt.
    #[derive(Default)]
    struct PromptPending {
        releases: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FrameSource for PromptPending {
        async fn acquire(&mut self, _: &CaptureRequest) -> Result<CaptureHandle, CaptureError> {
            std::future::pending().await
        }

        async fn next_frame(&mut self, _: &CaptureHandle) -> Result<Frame, CaptureError> {
            Err(CaptureError::HandleClosed)
        }

        async fn release(&mut self, handle: &mut CaptureHandle) {
            handle.close();
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Source that gets stopped in the middle of a successful acquire.
    struct StoppedWhileOpening {
        stopper: Arc<OnceLock<SessionStopper>>,
        releases: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FrameSource for StoppedWhileOpening {
        async fn acquire(&mut self, request: &CaptureRequest) -> Result<CaptureHandle, CaptureError> {
            if let Some(stopper) = self.stopper.get() {
                stopper.stop();
            }
            Ok(CaptureHandle::open(*request))
        }

        async fn next_frame(&mut self, handle: &CaptureHandle) -> Result<Frame, CaptureError> {
            handle.ensure_open()?;
            Ok(Frame::new(vec![0; 4], 2, 2, 1))
        }

        async fn release(&mut self, handle: &mut CaptureHandle) {
            if handle.close() {
                self.releases.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn counting_callbacks(fired: &Arc<AtomicUsize>) -> ScanCallbacks {
        let (on_success, on_failure) = (Arc::clone(fired), Arc::clone(fired));
        ScanCallbacks::new(
            move |_| {
                on_success.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                on_failure.fetch_add(1, Ordering::SeqCst);
            },
        )
    }

    #[test]
    fn test_control_first_transition_wins() {
        let control = SessionControl::new();
        assert!(control.try_settle());
        assert!(!control.request_stop());
        assert!(!control.cancel.is_cancelled());

        let control = SessionControl::new();
        assert!(control.request_stop());
        assert!(!control.request_stop());
        assert!(!control.try_settle());
        assert!(control.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_success_reaches_wait() {
        let session = ScanSession::new(
            MockFrameSource::new(),
            Preloaded::new(ScriptedDetector::found_after(0, "menu/abc")),
        )
        .with_scan_config(ScanConfig::unpaced());

        let handle = session.start(Facing::Back, ScanCallbacks::silent()).await;
        let outcome = handle.wait().await;
        assert_eq!(outcome.payload(), Some("menu/abc"));
    }

    #[tokio::test]
    async fn test_detector_unavailable_releases_handle() {
        let source = MockFrameSource::new();
        let stats = source.stats();
        let session = ScanSession::new(source, || -> Result<Arc<dyn CodeDetector>, DetectorError> {
            Err(DetectorError::Unavailable("module failed to load".into()))
        });

        let handle = session.start(Facing::Back, ScanCallbacks::silent()).await;
        assert!(handle.is_finished());
        assert_eq!(handle.state(), LoopState::Stopped);
        assert!(matches!(
            handle.wait().await,
            ScanOutcome::Failure {
                reason: FailureReason::DetectorUnavailable(_)
            }
        ));
        assert_eq!(stats.release_calls(), 1);
        assert_eq!(stats.frame_requests(), 0);
    }

    #[tokio::test]
    async fn test_drop_stops_session() {
        let source = MockFrameSource::new().stall_after(0);
        let stats = source.stats();
        let session = ScanSession::new(source, Preloaded::new(ScriptedDetector::never()));

        let handle = session.start(Facing::Back, ScanCallbacks::silent()).await;
        let mut state = handle.state_updates();
        drop(handle);

        state.wait_for(|s| *s == LoopState::Stopped).await.unwrap();
        // Release follows the state change on the same task.
        while stats.release_calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(stats.release_calls(), 1);
    }

    #[tokio::test]
    async fn test_panicking_success_callback_still_releases() {
        let source = MockFrameSource::new();
        let stats = source.stats();
        let session = ScanSession::new(
            source,
            Preloaded::new(ScriptedDetector::found_after(0, "menu/abc")),
        )
        .with_scan_config(ScanConfig::unpaced());

        let handle = session
            .start(
                Facing::Back,
                ScanCallbacks::new(|_| panic!("ui gone"), |_| {}),
            )
            .await;
        let waited = tokio::spawn(handle.wait()).await;

        assert!(waited.unwrap_err().is_panic());
        assert_eq!(stats.release_calls(), 1);
        assert_eq!(stats.streams_stopped(), 1);
    }

    #[tokio::test]
    async fn test_panicking_failure_callback_still_releases() {
        let source = MockFrameSource::new();
        let stats = source.stats();
        let session = ScanSession::new(source, || -> Result<Arc<dyn CodeDetector>, DetectorError> {
            Err(DetectorError::Unavailable("module failed to load".into()))
        });

        let started = tokio::spawn(session.start(
            Facing::Back,
            ScanCallbacks::new(|_| {}, |_| panic!("ui gone")),
        ))
        .await;

        assert!(started.unwrap_err().is_panic());
        assert_eq!(stats.release_calls(), 1);
    }

    #[tokio::test]
    async fn test_stop_while_acquiring() {
        let source = PromptPending::default();
        let releases = Arc::clone(&source.releases);
        let fired = Arc::new(AtomicUsize::new(0));
        let session = ScanSession::new(source, Preloaded::new(ScriptedDetector::never()));
        let stopper = session.stopper();
        let id = session.id();

        let starting = tokio::spawn(session.start(Facing::Back, counting_callbacks(&fired)));
        tokio::task::yield_now().await;
        assert!(stopper.stop());

        let handle = starting.await.unwrap();
        assert_eq!(handle.id(), id);
        assert!(handle.is_finished());
        assert_eq!(handle.state(), LoopState::Stopped);
        assert!(!handle.stop());
        assert_eq!(handle.wait().await, ScanOutcome::Cancelled);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(releases.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_before_start_never_acquires() {
        let source = MockFrameSource::new();
        let stats = source.stats();
        let session = ScanSession::new(source, Preloaded::new(ScriptedDetector::never()));
        assert!(session.stopper().stop());

        let outcome = session
            .start(Facing::Back, ScanCallbacks::silent())
            .await
            .wait()
            .await;

        assert_eq!(outcome, ScanOutcome::Cancelled);
        assert_eq!(stats.acquire_calls(), 0);
        assert_eq!(stats.release_calls(), 0);
    }

    #[tokio::test]
    async fn test_handle_opened_after_stop_is_released() {
        let stopper = Arc::new(OnceLock::new());
        let releases = Arc::new(AtomicUsize::new(0));
        let fired = Arc::new(AtomicUsize::new(0));
        let source = StoppedWhileOpening {
            stopper: Arc::clone(&stopper),
            releases: Arc::clone(&releases),
        };
        let session = ScanSession::new(source, Preloaded::new(ScriptedDetector::never()));
        let _ = stopper.set(session.stopper());

        let handle = session.start(Facing::Back, counting_callbacks(&fired)).await;

        assert!(handle.is_finished());
        assert_eq!(handle.wait().await, ScanOutcome::Cancelled);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
