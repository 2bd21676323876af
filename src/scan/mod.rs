//! Scan loop state machine and session lifecycle.
//!
//! A [`ScanSession`] opens a frame source, runs a [`ScanLoop`] against it,
//! reports exactly one [`ScanOutcome`] and always releases the camera.

mod outcome;
mod progress;
mod scan_loop;
mod session;
mod state;

pub use outcome::{FailureReason, ScanOutcome};
pub use progress::ScanProgress;
pub use scan_loop::{LoopExit, LoopReport, ScanLoop, StopCause};
pub use session::{ScanCallbacks, ScanSession, SessionHandle, SessionStopper};
pub use state::LoopState;
