//! Idle time via systemd-logind `DBus` interface.
//!
//! Reads `IdleHint` and `IdleSinceHint` from the current session. Idle time is
//! only as fine-grained as whatever sets the hint (usually the compositor or
//! session manager after its own idle timeout).

use std::env;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, info};
use zbus::Connection;
use zbus::zvariant::OwnedValue;

use super::{IdleError, IdleSource};

/// `DBus` service and path for login1.
const LOGIND_SERVICE: &str = "org.freedesktop.login1";
const LOGIND_PATH: &str = "/org/freedesktop/login1";
const MANAGER_INTERFACE: &str = "org.freedesktop.login1.Manager";
const SESSION_INTERFACE: &str = "org.freedesktop.login1.Session";
const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Idle source backed by the logind session idle hint.
pub struct LogindIdleSource {
    conn: Connection,
    session_path: String,
}

impl LogindIdleSource {
    /// Connect to the system bus and resolve the current session.
    pub async fn connect() -> Result<Self, IdleError> {
        let conn = Connection::system().await?;
        let session_path = resolve_session_path(&conn).await?;
        info!("Resolved session path: {}", session_path);

        Ok(Self { conn, session_path })
    }
}

#[async_trait]
impl IdleSource for LogindIdleSource {
    async fn idle_ms(&mut self) -> Result<u64, IdleError> {
        let idle: bool = get_property(&self.conn, &self.session_path, "IdleHint")
            .await?
            .try_into()
            .map_err(|_| IdleError::BadProperty("IdleHint is not a boolean".to_string()))?;

        if !idle {
            return Ok(0);
        }

        let since_usec: u64 = get_property(&self.conn, &self.session_path, "IdleSinceHint")
            .await?
            .try_into()
            .map_err(|_| IdleError::BadProperty("IdleSinceHint is not a u64".to_string()))?;

        Ok(idle_ms_since(since_usec, SystemTime::now()))
    }

    fn name(&self) -> &'static str {
        "logind"
    }
}

/// Milliseconds between a realtime microsecond timestamp and `now`.
///
/// A timestamp in the future (clock adjustments) reads as zero.
fn idle_ms_since(since_usec: u64, now: SystemTime) -> u64 {
    let now_usec = now
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX));

    now_usec.saturating_sub(since_usec) / 1_000
}

/// Resolve the session object path for the current session.
async fn resolve_session_path(conn: &Connection) -> Result<String, IdleError> {
    if let Ok(session_id) = env::var("XDG_SESSION_ID") {
        debug!("Using XDG_SESSION_ID: {}", session_id);

        let proxy =
            zbus::Proxy::new(conn, LOGIND_SERVICE, LOGIND_PATH, MANAGER_INTERFACE).await?;

        let path: zbus::zvariant::OwnedObjectPath =
            proxy.call("GetSession", &(&session_id,)).await?;

        return Ok(path.to_string());
    }

    debug!("XDG_SESSION_ID not set, trying to find current session");

    for alias in ["self", "auto"] {
        let path = format!("{LOGIND_PATH}/session/{alias}");
        if get_property(conn, &path, "IdleHint").await.is_ok() {
            return Ok(path);
        }
    }

    Err(IdleError::SessionNotFound(
        "set XDG_SESSION_ID or ensure a logind session is available".to_string(),
    ))
}

/// Get a property from a logind session object.
async fn get_property(
    conn: &Connection,
    session_path: &str,
    name: &str,
) -> Result<OwnedValue, IdleError> {
    let proxy =
        zbus::Proxy::new(conn, LOGIND_SERVICE, session_path, PROPERTIES_INTERFACE).await?;

    let value: OwnedValue = proxy.call("Get", &(SESSION_INTERFACE, name)).await?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_idle_ms_since_elapsed() {
        let now = UNIX_EPOCH + Duration::from_secs(1_000);
        let since = 995 * 1_000_000;
        assert_eq!(idle_ms_since(since, now), 5_000);
    }

    #[test]
    fn test_idle_ms_since_future_timestamp_is_zero() {
        let now = UNIX_EPOCH + Duration::from_secs(1_000);
        let since = 1_001 * 1_000_000;
        assert_eq!(idle_ms_since(since, now), 0);
    }
}
