//! One daemon per session.
//!
//! The guard is a well-known name on the session bus, claimed without
//! queueing. The bus releases it when the owning connection closes, so a
//! crashed daemon never leaves a stale lock behind.

use thiserror::Error;
use tracing::info;
use zbus::Connection;
use zbus::fdo::{RequestNameFlags, RequestNameReply};

/// Well-known bus name held by the running daemon.
pub const INSTANCE_BUS_NAME: &str = "io.github.idlelockd";

/// Errors from claiming the instance name.
#[derive(Error, Debug)]
pub enum InstanceError {
    #[error("Another idlelockd instance is already running")]
    AlreadyRunning,

    #[error("Failed to claim instance name: {0}")]
    DBus(#[from] zbus::Error),
}

/// Held for the process lifetime; dropping it releases the name.
#[derive(Debug)]
pub struct InstanceGuard {
    _conn: Connection,
}

impl InstanceGuard {
    /// Claim the instance name on the session bus.
    pub async fn acquire() -> Result<Self, InstanceError> {
        let conn = Connection::session().await?;
        Self::acquire_on(conn, INSTANCE_BUS_NAME).await
    }

    /// Claim `name` on an existing connection.
    pub async fn acquire_on(conn: Connection, name: &str) -> Result<Self, InstanceError> {
        match conn
            .request_name_with_flags(name, RequestNameFlags::DoNotQueue.into())
            .await
        {
            Ok(RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner) => {
                info!("Acquired instance name {}", name);
                Ok(Self { _conn: conn })
            }
            Ok(RequestNameReply::Exists | RequestNameReply::InQueue) | Err(zbus::Error::NameTaken) => {
                Err(InstanceError::AlreadyRunning)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_NAME: &str = "io.github.idlelockd.Test";

    async fn connect(address: &str) -> Connection {
        zbus::connection::Builder::address(address)
            .unwrap()
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_second_claim_reports_already_running() {
        let Ok(daemon) = dbus_launch::Launcher::daemon().launch() else {
            eprintln!("dbus-daemon not available, skipping");
            return;
        };

        let first = connect(daemon.address()).await;
        let second = connect(daemon.address()).await;

        let guard = InstanceGuard::acquire_on(first, TEST_NAME).await.unwrap();

        let result = InstanceGuard::acquire_on(second.clone(), TEST_NAME).await;
        assert!(matches!(result, Err(InstanceError::AlreadyRunning)));

        // A different name on the same bus is unaffected.
        InstanceGuard::acquire_on(second, "io.github.idlelockd.Other")
            .await
            .unwrap();

        drop(guard);
    }

    #[tokio::test]
    async fn test_reclaim_on_same_connection_succeeds() {
        let Ok(daemon) = dbus_launch::Launcher::daemon().launch() else {
            eprintln!("dbus-daemon not available, skipping");
            return;
        };

        let conn = connect(daemon.address()).await;
        InstanceGuard::acquire_on(conn.clone(), TEST_NAME).await.unwrap();
        InstanceGuard::acquire_on(conn, TEST_NAME).await.unwrap();
    }
}
