//! QR Scan Library
//!
//! Point a camera at a printed code, sample live frames until one decodes,
//! report the payload exactly once and release the camera.
//!
//! # Architecture
//!
//! ```text
//! ScanSession ──acquire──▶ FrameSource
//!      │                        ▲
//!      └──▶ ScanLoop ──next_frame┘
//!              │
//!              └──detect──▶ CodeDetector
//! ```
//!
//! # Guarantees
//!
//! - **One outcome**: each session ends in exactly one of success, failure
//!   or cancellation, and at most one callback fires
//! - **Always released**: a capture handle that was opened is released
//!   exactly once, on every exit path
//! - **At-most-once detection**: once a code is found, no further frames
//!   are requested and no further detections run
//! - **Stop wins**: a result that arrives after `stop` is discarded
//!
//! # Example
//!
//! ```no_run
//! use qr_scan::{
//!     capture::{Facing, MockFrameSource},
//!     detect::{Preloaded, ScriptedDetector},
//!     scan::{ScanCallbacks, ScanSession},
//! };
//!
//! # async fn demo() {
//! let session = ScanSession::new(
//!     MockFrameSource::new(),
//!     Preloaded::new(ScriptedDetector::found_after(3, "https://example.com/menu/demo1")),
//! );
//!
//! let handle = session
//!     .start(
//!         Facing::Back,
//!         ScanCallbacks::new(
//!             |payload| println!("scanned {payload}"),
//!             |reason| eprintln!("scan failed: {reason}"),
//!         ),
//!     )
//!     .await;
//!
//! let outcome = handle.wait().await;
//! # let _ = outcome;
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod capture;
pub mod detect;
pub mod metrics;
pub mod payload;
pub mod scan;

// Re-export commonly used types at crate root
pub use capture::{CaptureConfig, CaptureError, Facing, FileConfig, Frame, FrameSource};
pub use detect::{CodeDetector, DetectionResult, DetectorConfig, DetectorProvider};
pub use metrics::ScanMetrics;
pub use payload::MenuLink;
pub use scan::{FailureReason, LoopState, ScanCallbacks, ScanOutcome, ScanSession, SessionHandle};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
