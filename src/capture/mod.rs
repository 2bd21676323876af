//! Camera input and frame handling.
//!
//! This module provides the [`FrameSource`] abstraction that the scan loop
//! pulls frames from, plus the concrete sources shipped with the crate.

mod config;
mod frame;
mod mock;
mod source;
mod still;
#[cfg(feature = "camera")]
mod webcam;

pub use config::{CaptureConfig, ConfigError, Facing, FileConfig, MetricsConfig, ScanConfig};
pub use frame::Frame;
pub use mock::{MockFrameSource, MockStats};
pub use source::{CaptureError, CaptureHandle, CaptureRequest, FrameSource};
pub use still::StillImageSource;
#[cfg(feature = "camera")]
pub use webcam::WebcamSource;
