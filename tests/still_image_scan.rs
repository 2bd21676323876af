//! Scanning saved images through the default decoder.

#![cfg(feature = "decoder")]

use qr_scan::capture::{Facing, ScanConfig, StillImageSource};
use qr_scan::scan::{ScanCallbacks, ScanOutcome, ScanSession};
use qr_scan::{DetectorConfig, MenuLink};
use qrcode::{Color, QrCode};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const SCALE: u32 = 5;
const QUIET: u32 = 4;

/// Writes `payload` as a black-on-white PNG and returns its path.
fn write_code_png(name: &str, payload: &str) -> PathBuf {
    let code = QrCode::new(payload.as_bytes()).unwrap();
    let modules = code.width() as u32;
    let colors = code.to_colors();
    let size = (modules + 2 * QUIET) * SCALE;

    let image = image::GrayImage::from_fn(size, size, |x, y| {
        let (mx, my) = (x / SCALE, y / SCALE);
        let inside = (QUIET..QUIET + modules).contains(&mx) && (QUIET..QUIET + modules).contains(&my);
        let dark = inside && colors[((my - QUIET) * modules + (mx - QUIET)) as usize] == Color::Dark;
        image::Luma([if dark { 0 } else { 255 }])
    });

    let path = std::env::temp_dir().join(format!("qr-scan-{}-{}.png", name, std::process::id()));
    image.save(&path).unwrap();
    path
}

#[tokio::test]
async fn saved_menu_code_scans_to_success() {
    let url = "https://example.com/menu/demo1/burger";
    let path = write_code_png("menu", url);
    let scanned = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&scanned);

    let outcome = ScanSession::new(StillImageSource::new(&path), DetectorConfig::default())
        .with_scan_config(ScanConfig::unpaced())
        .start(
            Facing::Back,
            ScanCallbacks::new(move |payload| sink.lock().unwrap().push(payload), |_| {}),
        )
        .await
        .wait()
        .await;
    let _ = std::fs::remove_file(&path);

    assert_eq!(outcome.payload(), Some(url));
    assert_eq!(*scanned.lock().unwrap(), vec![url.to_string()]);
    let link = MenuLink::from_payload(url).unwrap();
    assert_eq!(link.route(), "/menu/demo1/burger");
}

#[tokio::test]
async fn blank_image_keeps_scanning_until_stopped() {
    let path = std::env::temp_dir().join(format!("qr-scan-blank-{}.png", std::process::id()));
    image::GrayImage::from_pixel(120, 80, image::Luma([255u8]))
        .save(&path)
        .unwrap();

    let handle = ScanSession::new(StillImageSource::new(&path), DetectorConfig::default())
        .with_scan_config(ScanConfig::unpaced())
        .start(Facing::Back, ScanCallbacks::silent())
        .await;
    let mut progress = handle.progress();
    progress
        .wait_for(|p| p.attempts >= 3)
        .await
        .unwrap();

    assert_eq!(handle.cancel().await, ScanOutcome::Cancelled);
    let _ = std::fs::remove_file(&path);
}
