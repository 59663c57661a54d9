//! MPRIS audio provider over the session bus.
//!
//! Every `org.mpris.MediaPlayer2.*` bus name is treated as one audio session
//! owned by the process behind that bus connection. MPRIS carries no metering,
//! so a `Playing` player reports a full-scale peak and anything else reports
//! silence.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, info, trace};
use zbus::Connection;
use zbus::zvariant::OwnedValue;

use super::{AudioError, AudioProvider, AudioSession, SessionState};

const DBUS_SERVICE: &str = "org.freedesktop.DBus";
const DBUS_PATH: &str = "/org/freedesktop/DBus";
const DBUS_INTERFACE: &str = "org.freedesktop.DBus";
const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

const MPRIS_PREFIX: &str = "org.mpris.MediaPlayer2.";
const MPRIS_PATH: &str = "/org/mpris/MediaPlayer2";
const PLAYER_INTERFACE: &str = "org.mpris.MediaPlayer2.Player";

/// Player table is shared by all queries within this window (one tick).
const REFRESH_AFTER: Duration = Duration::from_millis(500);

/// A media player seen on the bus.
#[derive(Debug, Clone, PartialEq)]
struct Player {
    bus_name: String,
    pid: u32,
    session: AudioSession,
}

/// Audio provider reading MPRIS playback status.
pub struct MprisAudio {
    conn: Option<Connection>,
    players: Vec<Player>,
    refreshed_at: Option<Instant>,
}

impl MprisAudio {
    /// Connect to the session bus.
    pub async fn connect() -> Result<Self, AudioError> {
        let conn = Connection::session()
            .await
            .map_err(|e| AudioError::Unavailable(e.to_string()))?;

        info!("Connected to session bus for MPRIS");
        Ok(Self {
            conn: Some(conn),
            players: Vec::new(),
            refreshed_at: None,
        })
    }

    /// Provider with no bus connection; every query reports unavailability
    /// until [`AudioProvider::reinitialize`] succeeds.
    pub fn disconnected() -> Self {
        Self {
            conn: None,
            players: Vec::new(),
            refreshed_at: None,
        }
    }

    async fn refresh(&mut self) -> Result<(), AudioError> {
        let Some(conn) = self.conn.as_ref() else {
            return Err(AudioError::Unavailable("not connected".to_string()));
        };

        let names = match list_player_names(conn).await {
            Ok(names) => names,
            Err(e) => {
                // Treat a broken bus as total loss; reinitialize reconnects.
                self.conn = None;
                return Err(AudioError::Unavailable(e.to_string()));
            }
        };

        let players = join_all(names.into_iter().map(|name| query_player(conn, name))).await;
        self.players = players.into_iter().flatten().collect();
        self.refreshed_at = Some(Instant::now());

        trace!("MPRIS players: {:?}", self.players);
        Ok(())
    }
}

#[async_trait]
impl AudioProvider for MprisAudio {
    async fn sessions_for(&mut self, pid: u32) -> Result<Vec<AudioSession>, AudioError> {
        let stale = self
            .refreshed_at
            .is_none_or(|at| at.elapsed() >= REFRESH_AFTER);

        if self.conn.is_none() || stale {
            self.refresh().await?;
        }

        Ok(sessions_owned_by(&self.players, pid))
    }

    async fn reinitialize(&mut self) -> Result<(), AudioError> {
        *self = Self::connect().await?;
        Ok(())
    }
}

fn sessions_owned_by(players: &[Player], pid: u32) -> Vec<AudioSession> {
    players
        .iter()
        .filter(|player| player.pid == pid)
        .map(|player| {
            trace!("{} belongs to pid {}", player.bus_name, pid);
            player.session
        })
        .collect()
}

/// Map an MPRIS `PlaybackStatus` to a session.
fn session_from_status(status: &str) -> Option<AudioSession> {
    match status {
        "Playing" => Some(AudioSession::new(SessionState::Active, 1.0)),
        "Paused" => Some(AudioSession::new(SessionState::Inactive, 0.0)),
        "Stopped" => Some(AudioSession::new(SessionState::Expired, 0.0)),
        _ => None,
    }
}

/// List bus names owned by MPRIS players.
async fn list_player_names(conn: &Connection) -> zbus::Result<Vec<String>> {
    let proxy = zbus::Proxy::new(conn, DBUS_SERVICE, DBUS_PATH, DBUS_INTERFACE).await?;
    let names: Vec<String> = proxy.call("ListNames", &()).await?;

    Ok(names
        .into_iter()
        .filter(|name| name.starts_with(MPRIS_PREFIX))
        .collect())
}

/// Resolve owner pid and playback status of one player.
///
/// Players that vanish or misbehave mid-query are skipped.
async fn query_player(conn: &Connection, bus_name: String) -> Option<Player> {
    match fetch_player(conn, &bus_name).await {
        Ok(player) => player,
        Err(e) => {
            debug!("Skipping player {}: {}", bus_name, e);
            None
        }
    }
}

async fn fetch_player(conn: &Connection, bus_name: &str) -> zbus::Result<Option<Player>> {
    let dbus = zbus::Proxy::new(conn, DBUS_SERVICE, DBUS_PATH, DBUS_INTERFACE).await?;
    let pid: u32 = dbus.call("GetConnectionUnixProcessID", &(bus_name,)).await?;

    let props = zbus::Proxy::new(conn, bus_name, MPRIS_PATH, PROPERTIES_INTERFACE).await?;
    let value: OwnedValue = props
        .call("Get", &(PLAYER_INTERFACE, "PlaybackStatus"))
        .await?;

    let status = String::try_from(value).unwrap_or_default();
    Ok(session_from_status(&status).map(|session| Player {
        bus_name: bus_name.to_string(),
        pid,
        session,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(name: &str, pid: u32, status: &str) -> Player {
        Player {
            bus_name: format!("{MPRIS_PREFIX}{name}"),
            pid,
            session: session_from_status(status).unwrap(),
        }
    }

    #[test]
    fn test_status_mapping() {
        let playing = session_from_status("Playing").unwrap();
        assert_eq!(playing.state, SessionState::Active);
        assert!(playing.peak_level > crate::audio::PEAK_THRESHOLD);

        let paused = session_from_status("Paused").unwrap();
        assert_eq!(paused.state, SessionState::Inactive);
        assert!(paused.peak_level <= crate::audio::PEAK_THRESHOLD);

        assert_eq!(
            session_from_status("Stopped").map(|s| s.state),
            Some(SessionState::Expired)
        );
        assert!(session_from_status("Buffering").is_none());
    }

    #[test]
    fn test_sessions_filtered_by_owner() {
        let players = vec![
            player("chromium.instance4021", 4021, "Playing"),
            player("vlc", 900, "Paused"),
            player("chromium.instance4021.tab2", 4021, "Stopped"),
        ];

        let sessions = sessions_owned_by(&players, 4021);
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].state, SessionState::Active);
        assert_eq!(sessions[1].state, SessionState::Expired);

        assert!(sessions_owned_by(&players, 1).is_empty());
    }

    #[tokio::test]
    async fn test_disconnected_reports_unavailable() {
        let mut audio = MprisAudio::disconnected();
        let err = audio.sessions_for(1).await.unwrap_err();
        assert!(matches!(err, AudioError::Unavailable(_)));
    }
}
