//! Prometheus metrics for scan sessions.
//!
//! # Metrics Exposed
//!
//! ## Session Metrics
//! - `qr_scan_sessions_started_total` - Sessions started
//! - `qr_scan_sessions_active` - Sessions currently holding a camera
//! - `qr_scan_outcomes_total{outcome}` - Finished sessions by outcome
//! - `qr_scan_failures_total{reason}` - Failed sessions by reason
//!
//! ## Loop Metrics
//! - `qr_scan_detect_attempts_total` - Detection attempts
//! - `qr_scan_frames_total` - Frames pulled from capture sources
//! - `qr_scan_detect_seconds` - Detection latency histogram
//!
//! With the `metrics` feature, [`MetricsServer`] serves the registry over
//! HTTP at `/metrics`.

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsSnapshot, ScanMetrics};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, ServerError};
