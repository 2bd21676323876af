//! Progress feedback published while a session runs.

use super::LoopState;
use std::time::Duration;

/// Snapshot of a running scan, for display only. Nothing in the loop reads
/// these values back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    /// Detection attempts made so far.
    pub attempts: u64,
    /// Frames pulled from the source.
    pub frames: u64,
    /// Time since the loop started.
    pub elapsed: Duration,
    /// Current loop state.
    pub state: LoopState,
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self {
            attempts: 0,
            frames: 0,
            elapsed: Duration::ZERO,
            state: LoopState::Idle,
        }
    }
}

impl ScanProgress {
    /// Short prompt suitable for an overlay under the viewfinder.
    pub fn feedback_text(&self) -> String {
        match self.state {
            LoopState::Idle => "Starting camera...".to_string(),
            LoopState::AwaitingFrame | LoopState::Detecting if self.attempts == 0 => {
                "Point your camera at a QR code to scan".to_string()
            }
            LoopState::AwaitingFrame | LoopState::Detecting => format!(
                "Point your camera at a QR code to scan ({}s)",
                self.elapsed.as_secs()
            ),
            LoopState::Done => "QR code scanned".to_string(),
            LoopState::Stopped => "Scanning stopped".to_string(),
        }
    }
}
