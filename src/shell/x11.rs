//! X11 dock/panel visibility via EWMH window types.

use std::fmt::Display;

use tracing::{debug, info};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{Atom, AtomEnum, ConnectionExt, MapState, Window};
use x11rb::rust_connection::RustConnection;

use super::{ShellError, ShellVisibility};

/// Hides and restores `_NET_WM_WINDOW_TYPE_DOCK` windows.
pub struct X11ShellSurfaces {
    conn: RustConnection,
    root: Window,
    active_window: Atom,
    window_type: Atom,
    dock_type: Atom,
    hidden: Vec<Window>,
}

fn request<T, E: Display>(result: Result<T, E>) -> Result<T, ShellError> {
    result.map_err(|e| ShellError::Request(e.to_string()))
}

impl X11ShellSurfaces {
    /// Connect to the display named by `DISPLAY`.
    pub fn connect() -> Result<Self, ShellError> {
        let (conn, screen_num) =
            x11rb::connect(None).map_err(|e| ShellError::Connect(e.to_string()))?;
        let root = conn.setup().roots[screen_num].root;

        let active_window = intern(&conn, "_NET_ACTIVE_WINDOW")?;
        let window_type = intern(&conn, "_NET_WM_WINDOW_TYPE")?;
        let dock_type = intern(&conn, "_NET_WM_WINDOW_TYPE_DOCK")?;

        info!("Shell surface hiding enabled");
        Ok(Self {
            conn,
            root,
            active_window,
            window_type,
            dock_type,
            hidden: Vec::new(),
        })
    }

    fn get_active_window_id(&self) -> Result<Option<Window>, ShellError> {
        let reply = request(request(self.conn.get_property(
            false,
            self.root,
            self.active_window,
            AtomEnum::WINDOW,
            0,
            1,
        ))?
        .reply())?;

        Ok(reply
            .value32()
            .and_then(|mut values| values.next())
            .filter(|&window| window != x11rb::NONE))
    }

    fn is_dock(&self, window: Window) -> Result<bool, ShellError> {
        let reply = request(request(self.conn.get_property(
            false,
            window,
            self.window_type,
            AtomEnum::ATOM,
            0,
            32,
        ))?
        .reply())?;

        Ok(reply
            .value32()
            .is_some_and(|mut types| types.any(|t| t == self.dock_type)))
    }

    fn visible_docks(&self) -> Result<Vec<Window>, ShellError> {
        let tree = request(request(self.conn.query_tree(self.root))?.reply())?;

        let mut docks = Vec::new();
        for window in tree.children {
            // Windows can disappear between the tree query and these requests.
            let Ok(attrs) = request(request(self.conn.get_window_attributes(window))?.reply())
            else {
                continue;
            };
            if attrs.map_state == MapState::VIEWABLE && self.is_dock(window).unwrap_or(false) {
                docks.push(window);
            }
        }

        Ok(docks)
    }
}

impl ShellVisibility for X11ShellSurfaces {
    fn is_foreground_shell_surface(&mut self) -> Result<bool, ShellError> {
        match self.get_active_window_id()? {
            Some(window) => self.is_dock(window),
            None => Ok(false),
        }
    }

    fn hide(&mut self) -> Result<(), ShellError> {
        let docks = self.visible_docks()?;
        for &window in &docks {
            request(self.conn.unmap_window(window))?;
        }
        request(self.conn.flush())?;

        debug!("Hid {} shell surface(s)", docks.len());
        self.hidden.extend(docks);
        Ok(())
    }

    fn show(&mut self) -> Result<(), ShellError> {
        for window in self.hidden.drain(..) {
            // The dock may have exited while hidden.
            let _ = self.conn.map_window(window);
        }
        request(self.conn.flush())?;
        Ok(())
    }
}

fn intern(conn: &RustConnection, name: &str) -> Result<Atom, ShellError> {
    Ok(request(request(conn.intern_atom(false, name.as_bytes()))?.reply())?.atom)
}
