//! Trusted executable names.

use std::path::Path;
use tracing::{debug, info};

/// Executable names trusted when no whitelist file provides any.
pub const DEFAULT_ENTRIES: [&str; 2] = ["chrome", "msedge"];

/// Ordered, case-insensitive set of trusted executable names.
///
/// Loaded once at startup and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Whitelist {
    entries: Vec<String>,
}

impl Whitelist {
    /// Build from names, trimming each and dropping blanks and duplicates.
    ///
    /// Falls back to [`DEFAULT_ENTRIES`] if nothing usable remains.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() || entries.iter().any(|e| e.eq_ignore_ascii_case(name)) {
                continue;
            }
            entries.push(name.to_string());
        }

        if entries.is_empty() {
            debug!("Whitelist empty, using defaults: {:?}", DEFAULT_ENTRIES);
            entries = DEFAULT_ENTRIES.iter().map(ToString::to_string).collect();
        }

        Self { entries }
    }

    /// Parse whitelist file content: one executable name per line.
    pub fn parse(content: &str) -> Self {
        Self::new(content.lines())
    }

    /// Load from a file. A missing or unreadable file yields the defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let content = match path.map(std::fs::read_to_string) {
            Some(Ok(content)) => content,
            Some(Err(e)) => {
                debug!("Whitelist file not read: {}", e);
                String::new()
            }
            None => String::new(),
        };

        let whitelist = Self::parse(&content);
        info!("Whitelist: {}", whitelist.entries.join(", "));
        whitelist
    }

    /// Whether an executable name matches any entry, ignoring ASCII case.
    pub fn matches(&self, executable: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.eq_ignore_ascii_case(executable))
    }

    /// Entries in file order.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

impl Default for Whitelist {
    fn default() -> Self {
        Self::new(DEFAULT_ENTRIES)
    }
}
