//! Audio session telemetry.
//!
//! An [`AudioProvider`] exposes the audio sessions owned by a process; the
//! [`AudioActivityDetector`] turns those into a single "media is playing" bit.

mod detector;
pub mod mpris;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use detector::{AudioActivityDetector, PEAK_THRESHOLD};
pub use mpris::MprisAudio;

/// Lifecycle state of an audio session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Session is rendering.
    Active,
    /// Session exists but is paused or idle.
    Inactive,
    /// Session was closed.
    Expired,
}

impl SessionState {
    /// Whether the session still exists (active or inactive).
    pub fn is_open(self) -> bool {
        matches!(self, Self::Active | Self::Inactive)
    }
}

/// One audio session with its instantaneous peak level (0.0 to 1.0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioSession {
    pub state: SessionState,
    pub peak_level: f32,
}

impl AudioSession {
    pub fn new(state: SessionState, peak_level: f32) -> Self {
        Self { state, peak_level }
    }
}

/// Per-process audio session queries.
#[async_trait]
pub trait AudioProvider: Send {
    /// Audio sessions owned by `pid`.
    async fn sessions_for(&mut self, pid: u32) -> Result<Vec<AudioSession>, AudioError>;

    /// Re-acquire the underlying audio subsystem after total failure.
    async fn reinitialize(&mut self) -> Result<(), AudioError>;
}

/// Errors from an [`AudioProvider`].
#[derive(Error, Debug)]
pub enum AudioError {
    /// The audio subsystem as a whole cannot be reached.
    #[error("Audio subsystem unavailable: {0}")]
    Unavailable(String),

    /// A query for one process failed; other processes may still answer.
    #[error("Audio query for pid {pid} failed: {reason}")]
    Query { pid: u32, reason: String },
}
