//! Whitelisted process presence.

use std::collections::BTreeSet;
use std::path::Path;

use sysinfo::{ProcessRefreshKind, System, UpdateKind};
use thiserror::Error;
use tracing::{debug, warn};

use crate::whitelist::Whitelist;

/// One running process as seen by a [`ProcessProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub executable_name: String,
    /// Alternative name, e.g. the executable file name when the kernel
    /// truncated `executable_name`.
    pub alt_name: Option<String>,
}

impl ProcessEntry {
    pub fn new(pid: u32, executable_name: impl Into<String>) -> Self {
        Self {
            pid,
            executable_name: executable_name.into(),
            alt_name: None,
        }
    }
}

/// Errors from process enumeration.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Process enumeration failed: {0}")]
    Enumeration(String),
}

/// Lists running processes.
pub trait ProcessProvider: Send {
    fn enumerate(&mut self) -> Result<Vec<ProcessEntry>, ProcessError>;
}

/// Process provider backed by `sysinfo`.
pub struct SysinfoProcesses {
    sys: System,
}

impl SysinfoProcesses {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }

    fn refresh_kind() -> ProcessRefreshKind {
        ProcessRefreshKind::new().with_exe(UpdateKind::OnlyIfNotSet)
    }
}

impl Default for SysinfoProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProvider for SysinfoProcesses {
    fn enumerate(&mut self) -> Result<Vec<ProcessEntry>, ProcessError> {
        // Only names and exe paths are read.
        // Processes that exit between refresh and read are simply absent.
        self.sys.refresh_processes_specifics(Self::refresh_kind());

        let entries: Vec<ProcessEntry> = self
            .sys
            .processes()
            .iter()
            .map(|(pid, process)| ProcessEntry {
                pid: pid.as_u32(),
                executable_name: process.name().to_string(),
                alt_name: process
                    .exe()
                    .and_then(Path::file_name)
                    .map(|name| name.to_string_lossy().into_owned()),
            })
            .collect();

        if entries.is_empty() {
            return Err(ProcessError::Enumeration(
                "no processes visible".to_string(),
            ));
        }

        Ok(entries)
    }
}

/// Finds running processes whose executable name is whitelisted.
pub struct PresenceTracker {
    provider: Box<dyn ProcessProvider>,
}

impl PresenceTracker {
    pub fn new(provider: Box<dyn ProcessProvider>) -> Self {
        Self { provider }
    }

    /// PIDs of whitelisted processes. Empty if enumeration failed.
    pub fn matching_process_ids(&mut self, whitelist: &Whitelist) -> BTreeSet<u32> {
        let entries = match self.provider.enumerate() {
            Ok(entries) => entries,
            Err(e) => {
                warn!("{}", e);
                return BTreeSet::new();
            }
        };

        let pids: BTreeSet<u32> = entries
            .iter()
            .filter(|entry| is_whitelisted(entry, whitelist))
            .map(|entry| entry.pid)
            .collect();

        debug!("Whitelisted processes: {:?}", pids);
        pids
    }
}

fn is_whitelisted(entry: &ProcessEntry, whitelist: &Whitelist) -> bool {
    if !entry.executable_name.is_empty() && whitelist.matches(&entry.executable_name) {
        return true;
    }

    entry
        .alt_name
        .as_deref()
        .is_some_and(|name| !name.is_empty() && whitelist.matches(name))
}
