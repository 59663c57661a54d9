//! Lock surface: the external process shown while the screen is locked.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Opaque identifier for one spawned lock surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockHandle(u32);

impl LockHandle {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn id(self) -> u32 {
        self.0
    }
}

/// Errors from spawning or terminating the lock surface.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Lock command is empty")]
    EmptyCommand,

    #[error("Failed to spawn lock command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown lock handle {0:?}")]
    UnknownHandle(LockHandle),

    #[error("Failed to terminate lock process: {0}")]
    Terminate(#[from] std::io::Error),
}

/// Spawns and terminates the lock surface.
#[async_trait]
pub trait LockSurface: Send {
    async fn spawn(&mut self) -> Result<LockHandle, LockError>;

    async fn terminate(&mut self, handle: LockHandle) -> Result<(), LockError>;
}

/// Runs a configured command as the lock surface.
///
/// Children are spawned kill-on-drop, so dropping the surface (including on
/// process exit paths that unwind) never leaves a lock process behind.
#[derive(Debug)]
pub struct CommandLockSurface {
    program: String,
    args: Vec<String>,
    children: HashMap<LockHandle, Child>,
    next_id: u32,
}

impl CommandLockSurface {
    /// Build from an argv-style command line.
    pub fn new(command: &[String]) -> Result<Self, LockError> {
        let (program, args) = command.split_first().ok_or(LockError::EmptyCommand)?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            children: HashMap::new(),
            next_id: 1,
        })
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl LockSurface for CommandLockSurface {
    async fn spawn(&mut self) -> Result<LockHandle, LockError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LockError::Spawn {
                command: self.command_line(),
                source,
            })?;

        let handle = LockHandle::new(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);

        debug!(
            "Spawned lock process {:?} as {:?}",
            child.id(),
            handle
        );
        self.children.insert(handle, child);
        Ok(handle)
    }

    async fn terminate(&mut self, handle: LockHandle) -> Result<(), LockError> {
        let mut child = self
            .children
            .remove(&handle)
            .ok_or(LockError::UnknownHandle(handle))?;

        // Already exited (e.g. closed by the user): nothing left to kill.
        if let Ok(Some(status)) = child.try_wait() {
            debug!("Lock process already exited with {}", status);
            return Ok(());
        }

        child.kill().await?;
        Ok(())
    }
}

/// Lock surface that only logs, for `--dry-run`.
#[derive(Debug, Default)]
pub struct DryRunLockSurface {
    next_id: u32,
}

#[async_trait]
impl LockSurface for DryRunLockSurface {
    async fn spawn(&mut self) -> Result<LockHandle, LockError> {
        self.next_id = self.next_id.wrapping_add(1);
        info!("[DRY RUN] Would start lock surface");
        Ok(LockHandle::new(self.next_id))
    }

    async fn terminate(&mut self, handle: LockHandle) -> Result<(), LockError> {
        info!("[DRY RUN] Would stop lock surface {}", handle.id());
        Ok(())
    }
}

impl Drop for CommandLockSurface {
    fn drop(&mut self) {
        if !self.children.is_empty() {
            warn!("Killing {} lock process(es) on drop", self.children.len());
        }
    }
}
