//! Idle time via the X11 MIT-SCREEN-SAVER extension.

use async_trait::async_trait;
use tracing::info;
use x11rb::connection::Connection;
use x11rb::protocol::screensaver;
use x11rb::protocol::xproto::Window;
use x11rb::rust_connection::RustConnection;

use super::{IdleError, IdleSource};

/// Idle source reading `ms_since_user_input` from the X server.
pub struct X11IdleSource {
    conn: RustConnection,
    root: Window,
}

impl X11IdleSource {
    /// Connect to the display named by `DISPLAY`.
    pub fn connect() -> Result<Self, IdleError> {
        let (conn, screen_num) =
            x11rb::connect(None).map_err(|e| IdleError::X11Connect(e.to_string()))?;
        let root = conn.setup().roots[screen_num].root;

        // Fail at startup rather than on every tick if the extension is missing.
        screensaver::query_version(&conn, 1, 1)
            .map_err(|e| IdleError::X11Connect(e.to_string()))?
            .reply()
            .map_err(|e| IdleError::X11Connect(format!("MIT-SCREEN-SAVER unavailable: {e}")))?;

        info!("Connected to X server (screen {})", screen_num);
        Ok(Self { conn, root })
    }
}

#[async_trait]
impl IdleSource for X11IdleSource {
    async fn idle_ms(&mut self) -> Result<u64, IdleError> {
        let info = screensaver::query_info(&self.conn, self.root)
            .map_err(|e| IdleError::X11Request(e.to_string()))?
            .reply()
            .map_err(|e| IdleError::X11Request(e.to_string()))?;

        Ok(u64::from(info.ms_since_user_input))
    }

    fn name(&self) -> &'static str {
        "x11"
    }
}
