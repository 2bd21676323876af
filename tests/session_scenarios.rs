//! End-to-end session behavior against scripted sources and detectors.

use qr_scan::capture::{CaptureError, Facing, Frame, MockFrameSource, ScanConfig};
use qr_scan::detect::{
    CodeDetector, DetectionResult, DetectorError, Point, Preloaded, Quad, ScriptedDetector,
};
use qr_scan::metrics::ScanMetrics;
use qr_scan::scan::{FailureReason, LoopState, ScanCallbacks, ScanOutcome, ScanSession};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const DEMO_URL: &str = "https://example.com/menu/demo1";

/// Records every callback invocation.
#[derive(Default)]
struct CallbackLog {
    successes: Mutex<Vec<String>>,
    failures: Mutex<Vec<FailureReason>>,
}

impl CallbackLog {
    fn callbacks(self: &Arc<Self>) -> ScanCallbacks {
        let on_success = Arc::clone(self);
        let on_failure = Arc::clone(self);
        ScanCallbacks::new(
            move |payload| on_success.successes.lock().unwrap().push(payload),
            move |reason| on_failure.failures.lock().unwrap().push(reason),
        )
    }

    fn successes(&self) -> Vec<String> {
        self.successes.lock().unwrap().clone()
    }

    fn failures(&self) -> Vec<FailureReason> {
        self.failures.lock().unwrap().clone()
    }

    fn total(&self) -> usize {
        self.successes().len() + self.failures().len()
    }
}

fn unpaced<S: qr_scan::FrameSource + 'static>(
    source: S,
    detector: impl CodeDetector + 'static,
) -> ScanSession<S> {
    ScanSession::new(source, Preloaded::new(detector)).with_scan_config(ScanConfig::unpaced())
}

#[tokio::test]
async fn permission_denied_fails_immediately_without_release() {
    let source = MockFrameSource::new().deny_permission();
    let stats = source.stats();
    let log = Arc::new(CallbackLog::default());

    let handle = unpaced(source, ScriptedDetector::never())
        .start(Facing::Back, log.callbacks())
        .await;

    // Reported before start() returned.
    assert_eq!(log.failures().len(), 1);
    assert!(matches!(log.failures()[0], FailureReason::PermissionDenied(_)));
    assert!(handle.is_finished());

    let outcome = handle.wait().await;
    assert!(matches!(
        outcome,
        ScanOutcome::Failure {
            reason: FailureReason::PermissionDenied(_)
        }
    ));
    assert!(log.successes().is_empty());
    assert_eq!(stats.acquire_calls(), 1);
    assert_eq!(stats.release_calls(), 0);
    assert_eq!(stats.frame_requests(), 0);
}

#[tokio::test]
async fn missing_device_fails_immediately() {
    let source = MockFrameSource::new().without_device();
    let stats = source.stats();
    let log = Arc::new(CallbackLog::default());

    let outcome = unpaced(source, ScriptedDetector::never())
        .start(Facing::Front, log.callbacks())
        .await
        .wait()
        .await;

    assert!(matches!(
        outcome,
        ScanOutcome::Failure {
            reason: FailureReason::DeviceUnavailable(_)
        }
    ));
    assert_eq!(log.total(), 1);
    assert_eq!(stats.release_calls(), 0);
}

#[tokio::test]
async fn three_misses_then_found_reports_once_after_four_detections() {
    let source = MockFrameSource::new();
    let stats = source.stats();
    let detector = ScriptedDetector::found_after(3, DEMO_URL);
    let calls = detector.call_counter();
    let log = Arc::new(CallbackLog::default());

    let handle = unpaced(source, detector)
        .start(Facing::Back, log.callbacks())
        .await;
    let state = handle.state_updates();
    let outcome = handle.wait().await;

    assert_eq!(
        outcome,
        ScanOutcome::Success {
            payload: DEMO_URL.to_string()
        }
    );
    assert_eq!(log.successes(), vec![DEMO_URL.to_string()]);
    assert!(log.failures().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(stats.frame_requests(), 4);
    assert_eq!(stats.release_calls(), 1);
    assert_eq!(stats.streams_stopped(), 1);
    assert_eq!(*state.borrow(), LoopState::Done);
}

#[tokio::test]
async fn stop_while_awaiting_frame_is_silent_and_releases_once() {
    let source = MockFrameSource::new().stall_after(0);
    let stats = source.stats();
    let log = Arc::new(CallbackLog::default());

    let handle = unpaced(source, ScriptedDetector::never())
        .start(Facing::Back, log.callbacks())
        .await;
    let mut state = handle.state_updates();
    state
        .wait_for(|s| *s == LoopState::AwaitingFrame)
        .await
        .unwrap();

    assert!(handle.stop());
    assert!(!handle.stop());

    let outcome = handle.wait().await;
    assert_eq!(outcome, ScanOutcome::Cancelled);
    assert_eq!(*state.borrow(), LoopState::Stopped);
    assert_eq!(log.total(), 0);
    assert_eq!(stats.release_calls(), 1);
}

#[tokio::test]
async fn not_found_loops_back_without_side_effects() {
    let source = MockFrameSource::new().stall_after(1);
    let stats = source.stats();
    let log = Arc::new(CallbackLog::default());

    let handle = unpaced(source, ScriptedDetector::never())
        .start(Facing::Back, log.callbacks())
        .await;
    let mut progress = handle.progress();
    progress
        .wait_for(|p| p.attempts == 1 && p.state == LoopState::AwaitingFrame)
        .await
        .unwrap();

    assert_eq!(log.total(), 0);
    assert_eq!(stats.release_calls(), 0);

    assert_eq!(handle.cancel().await, ScanOutcome::Cancelled);
    assert_eq!(stats.release_calls(), 1);
}

#[tokio::test]
async fn no_frames_or_detections_after_done() {
    let source = MockFrameSource::new();
    let stats = source.stats();
    let detector = ScriptedDetector::found_after(0, "first");
    let calls = detector.call_counter();

    let handle = unpaced(source, detector)
        .start(Facing::Back, ScanCallbacks::silent())
        .await;
    let outcome = handle.wait().await;
    assert_eq!(outcome.payload(), Some("first"));

    // Give any stray work a chance to run.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(stats.frame_requests(), 1);
}

#[tokio::test]
async fn stop_after_success_has_no_effect() {
    let detector = ScriptedDetector::found_after(0, DEMO_URL);
    let handle = unpaced(MockFrameSource::new(), detector)
        .start(Facing::Back, ScanCallbacks::silent())
        .await;
    let mut state = handle.state_updates();
    state.wait_for(|s| *s == LoopState::Done).await.unwrap();
    while !handle.is_finished() {
        tokio::task::yield_now().await;
    }

    assert!(!handle.stop());
    assert_eq!(handle.wait().await.payload(), Some(DEMO_URL));
}

#[tokio::test]
async fn stream_failure_reports_failure_and_releases() {
    let source =
        MockFrameSource::new().fail_after(2, CaptureError::StreamFailed("camera unplugged".into()));
    let stats = source.stats();
    let log = Arc::new(CallbackLog::default());

    let outcome = unpaced(source, ScriptedDetector::never())
        .start(Facing::Back, log.callbacks())
        .await
        .wait()
        .await;

    assert_eq!(
        outcome,
        ScanOutcome::Failure {
            reason: FailureReason::StreamInterrupted("camera unplugged".into())
        }
    );
    assert_eq!(log.failures().len(), 1);
    assert!(log.successes().is_empty());
    assert_eq!(stats.release_calls(), 1);
}

#[tokio::test]
async fn handle_closed_mid_stream_is_cancellation() {
    let source = MockFrameSource::new().fail_after(1, CaptureError::HandleClosed);
    let stats = source.stats();
    let log = Arc::new(CallbackLog::default());

    let outcome = unpaced(source, ScriptedDetector::never())
        .start(Facing::Back, log.callbacks())
        .await
        .wait()
        .await;

    assert_eq!(outcome, ScanOutcome::Cancelled);
    assert_eq!(log.total(), 0);
    assert_eq!(stats.release_calls(), 1);
}

#[tokio::test]
async fn detector_unavailable_is_distinct_failure() {
    let source = MockFrameSource::new();
    let stats = source.stats();
    let log = Arc::new(CallbackLog::default());
    let provider = || -> Result<Arc<dyn CodeDetector>, DetectorError> {
        Err(DetectorError::Unavailable("decoder module failed to load".into()))
    };

    let outcome = ScanSession::new(source, provider)
        .start(Facing::Back, log.callbacks())
        .await
        .wait()
        .await;

    assert!(matches!(
        outcome,
        ScanOutcome::Failure {
            reason: FailureReason::DetectorUnavailable(_)
        }
    ));
    assert_eq!(log.failures().len(), 1);
    assert_eq!(stats.release_calls(), 1);
}

#[tokio::test]
async fn late_found_after_stop_is_discarded() {
    let entered = Arc::new(tokio::sync::Notify::new());
    let gate = Arc::new(std::sync::Barrier::new(2));
    let detector = {
        let entered = Arc::clone(&entered);
        let gate = Arc::clone(&gate);
        move |_: &Frame| -> DetectionResult {
            entered.notify_one();
            gate.wait();
            DetectionResult::Found {
                payload: "too late".into(),
                quad: Quad([Point::new(0.0, 0.0); 4]),
            }
        }
    };
    let source = MockFrameSource::new();
    let stats = source.stats();
    let log = Arc::new(CallbackLog::default());

    let handle = unpaced(source, detector)
        .start(Facing::Back, log.callbacks())
        .await;
    entered.notified().await;
    assert!(handle.stop());
    gate.wait();

    assert_eq!(handle.wait().await, ScanOutcome::Cancelled);
    assert_eq!(log.total(), 0);
    assert_eq!(stats.release_calls(), 1);
}

#[tokio::test]
async fn parallel_sessions_are_independent() {
    let first = MockFrameSource::new();
    let second = MockFrameSource::new().stall_after(0);
    let (first_stats, second_stats) = (first.stats(), second.stats());

    let a = unpaced(first, ScriptedDetector::found_after(2, "menu-a"))
        .start(Facing::Back, ScanCallbacks::silent())
        .await;
    let b = unpaced(second, ScriptedDetector::found_after(0, "menu-b"))
        .start(Facing::Front, ScanCallbacks::silent())
        .await;
    assert_ne!(a.id(), b.id());

    assert_eq!(a.wait().await.payload(), Some("menu-a"));
    assert!(!b.is_finished());
    assert_eq!(b.cancel().await, ScanOutcome::Cancelled);

    assert_eq!(first_stats.release_calls(), 1);
    assert_eq!(second_stats.release_calls(), 1);
}

#[tokio::test]
async fn metrics_track_outcomes() {
    let metrics = Arc::new(ScanMetrics::new().unwrap());
    let detector = ScriptedDetector::found_after(1, DEMO_URL);

    let outcome = unpaced(MockFrameSource::new(), detector)
        .with_metrics(Arc::clone(&metrics))
        .start(Facing::Back, ScanCallbacks::silent())
        .await
        .wait()
        .await;
    assert!(matches!(outcome, ScanOutcome::Success { .. }));

    let denied = unpaced(MockFrameSource::new().deny_permission(), ScriptedDetector::never())
        .with_metrics(Arc::clone(&metrics))
        .start(Facing::Back, ScanCallbacks::silent())
        .await
        .wait()
        .await;
    assert!(matches!(denied, ScanOutcome::Failure { .. }));

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.sessions_started, 2);
    assert_eq!(snapshot.sessions_active, 0);
    assert_eq!(snapshot.successes, 1);
    assert_eq!(snapshot.failures, 1);
    assert_eq!(snapshot.detect_attempts, 2);
    assert_eq!(snapshot.frames, 2);
}

#[tokio::test]
async fn callbacks_fire_before_wait_resolves() {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let callbacks = ScanCallbacks::new(
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        |_| {},
    );

    let outcome = unpaced(MockFrameSource::new(), ScriptedDetector::found_after(0, "x"))
        .start(Facing::Back, callbacks)
        .await
        .wait()
        .await;

    assert_eq!(outcome.payload(), Some("x"));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}
