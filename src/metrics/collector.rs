//! Metrics collection and registry.

use crate::scan::ScanOutcome;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Point-in-time copy of the counters, for reports and assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Sessions started.
    pub sessions_started: u64,
    /// Sessions currently running.
    pub sessions_active: i64,
    /// Sessions that decoded a payload.
    pub successes: u64,
    /// Sessions that ended on an error.
    pub failures: u64,
    /// Sessions stopped before a result.
    pub cancellations: u64,
    /// Detection attempts across all sessions.
    pub detect_attempts: u64,
    /// Frames sampled across all sessions.
    pub frames: u64,
}

/// Prometheus metrics shared by every session in the process.
pub struct ScanMetrics {
    registry: Registry,

    // Session metrics
    sessions_started: IntCounter,
    sessions_active: IntGauge,
    outcomes: IntCounterVec,
    failures: IntCounterVec,

    // Loop metrics
    detect_attempts: IntCounter,
    frames: IntCounter,
    detect_seconds: Histogram,
}

impl ScanMetrics {
    /// Creates a registry with all scan metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let sessions_started = IntCounter::new(
            "qr_scan_sessions_started_total",
            "Total number of scan sessions started",
        )?;
        let sessions_active = IntGauge::new(
            "qr_scan_sessions_active",
            "Scan sessions currently holding a camera",
        )?;
        let outcomes = IntCounterVec::new(
            Opts::new(
                "qr_scan_outcomes_total",
                "Finished sessions by outcome (success, failure, cancelled)",
            ),
            &["outcome"],
        )?;
        let failures = IntCounterVec::new(
            Opts::new("qr_scan_failures_total", "Failed sessions by reason"),
            &["reason"],
        )?;

        let detect_attempts = IntCounter::new(
            "qr_scan_detect_attempts_total",
            "Total detection attempts",
        )?;
        let frames = IntCounter::new(
            "qr_scan_frames_total",
            "Total frames pulled from capture sources",
        )?;
        let detect_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "qr_scan_detect_seconds",
                "Time spent in a single detection attempt",
            )
            .buckets(vec![0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5]),
        )?;

        registry.register(Box::new(sessions_started.clone()))?;
        registry.register(Box::new(sessions_active.clone()))?;
        registry.register(Box::new(outcomes.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(detect_attempts.clone()))?;
        registry.register(Box::new(frames.clone()))?;
        registry.register(Box::new(detect_seconds.clone()))?;

        Ok(Self {
            registry,
            sessions_started,
            sessions_active,
            outcomes,
            failures,
            detect_attempts,
            frames,
            detect_seconds,
        })
    }

    /// Counts a session start.
    pub fn session_started(&self) {
        self.sessions_started.inc();
        self.sessions_active.inc();
    }

    /// Counts a session's terminal outcome.
    pub fn session_finished(&self, outcome: &ScanOutcome) {
        self.sessions_active.dec();
        self.outcomes.with_label_values(&[outcome.kind()]).inc();
        if let ScanOutcome::Failure { reason } = outcome {
            self.failures.with_label_values(&[reason.kind()]).inc();
        }
    }

    /// Counts one sampled frame.
    pub fn record_frame(&self) {
        self.frames.inc();
    }

    /// Counts one detection attempt and its latency.
    pub fn record_attempt(&self, took: Duration) {
        self.detect_attempts.inc();
        self.detect_seconds.observe(took.as_secs_f64());
    }

    /// Copies the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_started: self.sessions_started.get(),
            sessions_active: self.sessions_active.get(),
            successes: self.outcomes.with_label_values(&["success"]).get(),
            failures: self.outcomes.with_label_values(&["failure"]).get(),
            cancellations: self.outcomes.with_label_values(&["cancelled"]).get(),
            detect_attempts: self.detect_attempts.get(),
            frames: self.frames.get(),
        }
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl std::fmt::Debug for ScanMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
