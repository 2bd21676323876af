//! Detector that replays a fixed script of results.

use super::{CodeDetector, DetectionResult, Point, Quad};
use crate::capture::Frame;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Replays `misses` × `NotFound`, then finds `payload` on every later call.
///
/// The call counter is shared so it can be read after the detector has been
/// handed to a session.
#[derive(Debug, Clone)]
pub struct ScriptedDetector {
    misses: usize,
    payload: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedDetector {
    /// Finds `payload` after `misses` empty frames.
    pub fn found_after(misses: usize, payload: impl Into<String>) -> Self {
        Self {
            misses,
            payload: Some(payload.into()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Never finds anything.
    pub fn never() -> Self {
        Self {
            misses: usize::MAX,
            payload: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of `detect` calls made so far, across all clones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Shared handle to the call counter.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl CodeDetector for ScriptedDetector {
    fn detect(&self, frame: &Frame) -> DetectionResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.payload {
            Some(payload) if call >= self.misses => {
                let (w, h) = (frame.width() as f32, frame.height() as f32);
                DetectionResult::Found {
                    payload: payload.clone(),
                    quad: Quad([
                        Point::new(w * 0.25, h * 0.25),
                        Point::new(w * 0.75, h * 0.25),
                        Point::new(w * 0.75, h * 0.75),
                        Point::new(w * 0.25, h * 0.75),
                    ]),
                }
            }
            _ => DetectionResult::NotFound,
        }
    }
}
