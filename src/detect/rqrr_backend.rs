//! QR decoding via the `rqrr` crate.

use super::{CodeDetector, DetectionResult, Point, Quad};
use crate::capture::Frame;

/// Detector backed by `rqrr`'s grid finder and decoder.
///
/// Stateless: each call prepares its own image from the frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct RqrrDetector;

impl RqrrDetector {
    /// Creates the detector.
    pub fn new() -> Self {
        Self
    }
}

impl CodeDetector for RqrrDetector {
    fn detect(&self, frame: &Frame) -> DetectionResult {
        if !frame.is_valid() {
            tracing::warn!(?frame, "Skipping malformed frame");
            return DetectionResult::NotFound;
        }

        let width = frame.width() as usize;
        let pixels = frame.pixels();
        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width, frame.height() as usize, |x, y| {
                pixels[y * width + x]
            });

        // A frame can hold several grids; the first one that decodes wins.
        for grid in prepared.detect_grids() {
            match grid.decode() {
                Ok((_meta, payload)) => {
                    let quad = Quad(grid.bounds.map(|p| Point::new(p.x as f32, p.y as f32)));
                    return DetectionResult::Found { payload, quad };
                }
                Err(e) => {
                    tracing::trace!(error = ?e, sequence = frame.sequence(), "Grid failed to decode");
                }
            }
        }

        DetectionResult::NotFound
    }
}
