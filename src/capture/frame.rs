//! Frame type representing one sampled image from a capture stream.

use std::time::Instant;

/// Luma weights for RGB to grayscale: Y = (77*R + 150*G + 29*B) >> 8.
const LUMA_R: u32 = 77;
const LUMA_G: u32 = 150;
const LUMA_B: u32 = 29;

/// A single 8-bit grayscale frame taken from the stream at one instant.
///
/// Frames are immutable once built and are handed to exactly one
/// detection attempt.
#[derive(Clone)]
pub struct Frame {
    /// Row-major luma samples, one byte per pixel.
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    /// When the frame left the source.
    captured_at: Instant,
    /// Monotonic sequence number within one capture handle.
    sequence: u64,
}

impl Frame {
    /// Creates a new grayscale frame.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            captured_at: Instant::now(),
            sequence,
        }
    }

    /// Builds a grayscale frame from interleaved RGBA bytes, the layout a
    /// canvas or most camera APIs hand out. The alpha channel is ignored.
    pub fn from_rgba(rgba: &[u8], width: u32, height: u32, sequence: u64) -> Self {
        let pixels = rgba
            .chunks_exact(4)
            .map(|px| {
                let y = LUMA_R * px[0] as u32 + LUMA_G * px[1] as u32 + LUMA_B * px[2] as u32;
                (y >> 8) as u8
            })
            .collect();
        Self::new(pixels, width, height, sequence)
    }

    /// Returns a reference to the raw pixel data.
    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Returns the frame width.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the frame height.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the luma value at `(x, y)`, or `None` outside the frame.
    #[inline]
    pub fn luma(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Returns when the frame was captured.
    #[inline]
    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Returns the sequence number.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the total number of pixels (width * height).
    #[inline]
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Validates that the pixel buffer size matches dimensions.
    pub fn is_valid(&self) -> bool {
        self.pixel_count() > 0 && self.pixels.len() == self.pixel_count()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("pixel_bytes", &self.pixels.len())
            .finish()
    }
}
