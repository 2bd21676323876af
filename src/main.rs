//! QR Scan CLI
//!
//! Opens a camera (or an image file standing in for one), scans until a
//! code is decoded, prints the payload and exits.

use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use qr_scan::{
    capture::{FileConfig, FrameSource, StillImageSource},
    metrics::ScanMetrics,
    payload::MenuLink,
    scan::{ScanCallbacks, ScanOutcome, ScanSession},
    Facing,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    /// Live camera (requires the `camera` feature)
    Camera,
    /// Image file given with --image
    Image,
}

#[derive(Debug, Parser)]
#[command(name = "qr-scan", version, about = "Scan a QR code from a camera or an image")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where frames come from
    #[arg(long, value_enum)]
    source: Option<SourceKind>,

    /// Image to scan (implies --source image)
    #[arg(long)]
    image: Option<PathBuf>,

    /// Camera direction: front or back
    #[arg(long)]
    facing: Option<Facing>,

    /// Preferred frame width
    #[arg(long)]
    width: Option<u32>,

    /// Preferred frame height
    #[arg(long)]
    height: Option<u32>,

    /// Give up after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Serve Prometheus metrics on this port (0 disables)
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Print a JSON report instead of plain text
    #[arg(long)]
    json: bool,
}

/// Machine-readable summary printed with --json.
#[derive(Debug, Serialize)]
struct ScanReport {
    session: Uuid,
    #[serde(flatten)]
    outcome: ScanOutcome,
    menu: Option<MenuLink>,
    attempts: u64,
    elapsed_ms: u128,
    finished_at: DateTime<Utc>,
}

const EXIT_FAILURE: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_CANCELLED: i32 = 130;

#[tokio::main]
async fn main() {
    // Initialize logging; stdout is reserved for the result
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_USAGE
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    info!("QR Scan v{}", qr_scan::VERSION);

    let mut config = match &cli.config {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };
    if let Some(facing) = cli.facing {
        config.capture.facing = facing;
    }
    if let Some(width) = cli.width {
        config.capture.width = width;
    }
    if let Some(height) = cli.height {
        config.capture.height = height;
    }
    if let Some(timeout) = cli.timeout {
        config.scan.timeout_secs = Some(timeout);
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }
    config.capture.validate()?;

    let source = build_source(&cli)?;
    let metrics = Arc::new(ScanMetrics::new()?);
    spawn_metrics_server(config.metrics.port, &metrics);

    let session = ScanSession::new(source, config.detector.clone())
        .with_capture_config(config.capture.clone())
        .with_scan_config(config.scan.clone())
        .with_metrics(Arc::clone(&metrics));

    let session_id = session.id();

    // Wired up before start; acquisition can block on a permission prompt.
    let stopper = session.stopper();
    ctrlc::set_handler(move || {
        stopper.stop();
    })?;

    if let Some(timeout) = config.scan.timeout() {
        let stopper = session.stopper();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if stopper.stop() {
                warn!(secs = timeout.as_secs(), "Scan timed out");
            }
        });
    }

    let handle = session
        .start(
            config.capture.facing,
            ScanCallbacks::new(
                |payload| info!(bytes = payload.len(), "QR code scanned successfully"),
                |reason| warn!(%reason, "Scan failed"),
            ),
        )
        .await;

    let mut progress = handle.progress();
    tokio::spawn(async move {
        let mut announced = 0;
        while progress.changed().await.is_ok() {
            let snapshot = *progress.borrow_and_update();
            if snapshot.elapsed.as_secs() >= announced + 5 {
                announced = snapshot.elapsed.as_secs();
                info!(attempts = snapshot.attempts, "{}", snapshot.feedback_text());
            }
        }
    });

    let progress = handle.progress();
    let outcome = handle.wait().await;
    let last = *progress.borrow();

    let menu = outcome
        .payload()
        .and_then(|payload| match MenuLink::from_payload(payload) {
            Ok(link) => Some(link),
            Err(e) => {
                warn!(error = %e, "Invalid QR code format");
                None
            }
        });

    let code = match &outcome {
        ScanOutcome::Success { .. } => 0,
        ScanOutcome::Failure { .. } => EXIT_FAILURE,
        ScanOutcome::Cancelled => EXIT_CANCELLED,
    };

    if cli.json {
        let report = ScanReport {
            session: session_id,
            outcome,
            menu,
            attempts: last.attempts,
            elapsed_ms: last.elapsed.as_millis(),
            finished_at: Utc::now(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        match &outcome {
            ScanOutcome::Success { payload } => {
                println!("{}", payload);
                if let Some(link) = &menu {
                    println!("route: {}", link.route());
                }
            }
            ScanOutcome::Failure { reason } => eprintln!("Scan failed: {}", reason),
            ScanOutcome::Cancelled => eprintln!("Scan cancelled"),
        }
    }

    info!("Done. Metrics: {:?}", metrics.snapshot());
    Ok(code)
}

fn build_source(cli: &Cli) -> Result<Box<dyn FrameSource>, String> {
    let kind = match (cli.source, &cli.image) {
        (Some(kind), _) => kind,
        (None, Some(_)) => SourceKind::Image,
        (None, None) => SourceKind::Camera,
    };

    match kind {
        SourceKind::Image => {
            let path = cli
                .image
                .clone()
                .ok_or_else(|| "--source image requires --image <path>".to_string())?;
            Ok(Box::new(StillImageSource::new(path)))
        }
        #[cfg(feature = "camera")]
        SourceKind::Camera => Ok(Box::new(qr_scan::capture::WebcamSource::new())),
        #[cfg(not(feature = "camera"))]
        SourceKind::Camera => Err(
            "built without the `camera` feature; rebuild with --features camera or pass --image"
                .to_string(),
        ),
    }
}

#[cfg(feature = "metrics")]
fn spawn_metrics_server(port: u16, metrics: &Arc<ScanMetrics>) {
    use qr_scan::metrics::{MetricsServer, MetricsServerConfig};

    if port == 0 {
        return;
    }
    let server = MetricsServer::new(MetricsServerConfig::with_port(port), Arc::clone(metrics));
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            warn!(error = %e, "Metrics server stopped");
        }
    });
}

#[cfg(not(feature = "metrics"))]
fn spawn_metrics_server(port: u16, _metrics: &Arc<ScanMetrics>) {
    if port != 0 {
        warn!(port, "Built without the `metrics` feature; not serving metrics");
    }
}
