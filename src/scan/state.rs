//! Scan loop states and the allowed transitions between them.

use serde::Serialize;
use std::fmt;

/// Where the scan loop currently is.
///
/// ```text
/// Idle ──▶ AwaitingFrame ◀──▶ Detecting ──▶ Done
///   └──────────┴─────────────────┴────────▶ Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Created, not started.
    Idle,
    /// Suspended on the frame source.
    AwaitingFrame,
    /// Running the detector on a frame.
    Detecting,
    /// A code was found. Terminal.
    Done,
    /// Cancelled or failed. Terminal.
    Stopped,
}

impl LoopState {
    /// Returns true for `Done` and `Stopped`.
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopState::Done | LoopState::Stopped)
    }

    /// Whether the loop may move from `self` to `next`.
    pub fn can_advance_to(self, next: LoopState) -> bool {
        use LoopState::*;
        match (self, next) {
            (Done | Stopped, _) => false,
            (_, Stopped) => true,
            (Idle, AwaitingFrame) => true,
            (AwaitingFrame, Detecting) => true,
            (Detecting, AwaitingFrame | Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Idle => "idle",
            LoopState::AwaitingFrame => "awaiting_frame",
            LoopState::Detecting => "detecting",
            LoopState::Done => "done",
            LoopState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
