//! Code detection capability.
//!
//! The scan core treats decoding as an opaque capability: a frame goes in,
//! a payload and its location (or nothing) come out. Detectors are built
//! through an explicit [`DetectorProvider::load`] step so that a missing or
//! broken decoder surfaces as [`DetectorError::Unavailable`] up front
//! instead of failing somewhere inside the loop.

#[cfg(feature = "decoder")]
mod rqrr_backend;
mod scripted;

#[cfg(feature = "decoder")]
pub use rqrr_backend::RqrrDetector;
pub use scripted::ScriptedDetector;

use crate::capture::Frame;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// 2D point in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate
    pub x: f32,
    /// Y coordinate
    pub y: f32,
}

impl Point {
    /// Create a new point
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Bounding quadrilateral of a detected code, corners in detector order.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Quad(pub [Point; 4]);

impl Quad {
    /// Returns the mean of the four corners.
    pub fn center(&self) -> Point {
        let (sx, sy) = self
            .0
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Point::new(sx / 4.0, sy / 4.0)
    }
}

/// Result of one detection attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionResult {
    /// A code was decoded.
    Found {
        /// Decoded payload, uninterpreted.
        payload: String,
        /// Where the code sits in the frame.
        quad: Quad,
    },
    /// No decodable code in this frame.
    NotFound,
}

impl DetectionResult {
    /// Returns true for [`DetectionResult::Found`].
    pub fn is_found(&self) -> bool {
        matches!(self, DetectionResult::Found { .. })
    }
}

/// Decodes codes from frames.
///
/// Implementations must be pure functions of the frame: no state carried
/// between calls that could change a later result.
pub trait CodeDetector: Send + Sync {
    /// Attempts to find and decode a code in `frame`.
    fn detect(&self, frame: &Frame) -> DetectionResult;
}

impl<F> CodeDetector for F
where
    F: Fn(&Frame) -> DetectionResult + Send + Sync,
{
    fn detect(&self, frame: &Frame) -> DetectionResult {
        self(frame)
    }
}

/// Errors from detector construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectorError {
    #[error("code detector unavailable: {0}")]
    Unavailable(String),
}

/// Builds a detector for a session.
pub trait DetectorProvider: Send + Sync {
    /// Constructs the detector, or reports why it cannot be used.
    fn load(&self) -> Result<Arc<dyn CodeDetector>, DetectorError>;
}

impl<F> DetectorProvider for F
where
    F: Fn() -> Result<Arc<dyn CodeDetector>, DetectorError> + Send + Sync,
{
    fn load(&self) -> Result<Arc<dyn CodeDetector>, DetectorError> {
        self()
    }
}

/// Provider that hands out one already constructed detector.
#[derive(Clone)]
pub struct Preloaded(Arc<dyn CodeDetector>);

impl Preloaded {
    /// Wraps `detector` so every `load` returns it.
    pub fn new(detector: impl CodeDetector + 'static) -> Self {
        Self(Arc::new(detector))
    }
}

impl DetectorProvider for Preloaded {
    fn load(&self) -> Result<Arc<dyn CodeDetector>, DetectorError> {
        Ok(Arc::clone(&self.0))
    }
}

impl std::fmt::Debug for Preloaded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Preloaded").finish_non_exhaustive()
    }
}

/// Available decoding backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DetectorBackend {
    /// Pure-Rust QR decoder (`decoder` feature).
    #[default]
    Rqrr,
}

/// Detector selection, as read from the `[detector]` config section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DetectorConfig {
    /// Which backend to construct.
    pub backend: DetectorBackend,
}

impl DetectorProvider for DetectorConfig {
    fn load(&self) -> Result<Arc<dyn CodeDetector>, DetectorError> {
        match self.backend {
            #[cfg(feature = "decoder")]
            DetectorBackend::Rqrr => Ok(Arc::new(RqrrDetector::new())),
            #[cfg(not(feature = "decoder"))]
            DetectorBackend::Rqrr => Err(DetectorError::Unavailable(
                "built without the `decoder` feature".into(),
            )),
        }
    }
}
