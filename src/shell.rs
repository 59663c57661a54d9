//! Shell surface visibility (docks, panels, taskbars).
//!
//! Always-on-top shell surfaces can sit above the lock surface. When one of
//! them had focus at engagement, the engine hides them for the duration of
//! the lock. This is best-effort and disabled unless configured.

pub mod x11;

use thiserror::Error;

pub use x11::X11ShellSurfaces;

/// Errors from shell surface queries.
#[derive(Error, Debug)]
pub enum ShellError {
    #[error("X11 connection failed: {0}")]
    Connect(String),

    #[error("X11 request failed: {0}")]
    Request(String),
}

/// Controls visibility of shell surfaces.
pub trait ShellVisibility: Send {
    /// Whether the focused window is itself a shell surface.
    fn is_foreground_shell_surface(&mut self) -> Result<bool, ShellError>;

    /// Hide all visible shell surfaces.
    fn hide(&mut self) -> Result<(), ShellError>;

    /// Show the shell surfaces hidden by the last [`hide`](Self::hide).
    fn show(&mut self) -> Result<(), ShellError>;
}
