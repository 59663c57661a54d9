//! Configuration loading and defaults for idlelockd.
//!
//! Settings come from two places. The daemon's own `config.toml` holds every
//! tunable; a plain `KEY=value` overrides file (`app.config`) is applied on top
//! of it so the classic screensaver-manager tunables keep working.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Directory name under the user config dir.
const APP_DIR: &str = "idlelockd";

/// Smallest idle threshold that still leaves room for a re-activity threshold.
const MIN_IDLE_THRESHOLD_MS: u64 = 2;

/// Where idle time is read from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IdleSourceKind {
    /// X11 when `DISPLAY` is set, logind otherwise (default).
    #[default]
    Auto,
    /// MIT-SCREEN-SAVER extension on the X server.
    X11,
    /// systemd-logind session idle hint.
    Logind,
}

/// Main configuration for idlelockd.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Idle time after which the screen is locked (default: 120000).
    pub idle_threshold_ms: u64,

    /// Idle time below which a locked screen is released (default: 1000).
    pub reactivity_threshold_ms: u64,

    /// How long after media stops the lock stays suppressed (default: 15000).
    pub media_grace_ms: u64,

    /// How long a silent audio session still counts as playing (default: 5000).
    pub audio_grace_ms: u64,

    /// Delay between polling ticks (default: 1000).
    pub poll_interval_ms: u64,

    /// Path to the whitelist file.
    /// If unset, uses `<config dir>/idlelockd/whitelist.txt`.
    pub whitelist_path: Option<PathBuf>,

    /// Path to the `KEY=value` overrides file.
    /// If unset, uses `<config dir>/idlelockd/app.config`.
    pub overrides_path: Option<PathBuf>,

    /// Idle source selection.
    pub idle_source: IdleSourceKind,

    /// Command line of the lock process spawned on engagement.
    pub lock_command: Vec<String>,

    /// Hide dock/panel windows while locked if one had focus at engagement.
    pub hide_shell_surfaces: bool,

    /// Dry run mode: log engage/disengage instead of spawning.
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_threshold_ms: 120_000,
            reactivity_threshold_ms: 1_000,
            media_grace_ms: 15_000,
            audio_grace_ms: 5_000,
            poll_interval_ms: 1_000,
            whitelist_path: None,
            overrides_path: None,
            idle_source: IdleSourceKind::default(),
            lock_command: ["xlock", "-mode", "blank", "-nolock"]
                .into_iter()
                .map(String::from)
                .collect(),
            hide_shell_surfaces: false,
            dry_run: false,
        }
    }
}

/// Validated timing parameters shared by the detector and the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub idle: Duration,
    pub reactivity: Duration,
    pub media_grace: Duration,
    pub audio_grace: Duration,
    pub poll_interval: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Config::default().thresholds()
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from the default path, or return defaults if not found.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }

        if let Some(default_path) = default_file("config.toml")
            && default_path.exists()
        {
            return Self::load(&default_path);
        }

        Ok(Self::default())
    }

    /// Resolved whitelist file location.
    pub fn whitelist_file(&self) -> Option<PathBuf> {
        self.whitelist_path
            .clone()
            .or_else(|| default_file("whitelist.txt"))
    }

    /// Resolved overrides file location.
    pub fn overrides_file(&self) -> Option<PathBuf> {
        self.overrides_path
            .clone()
            .or_else(|| default_file("app.config"))
    }

    /// Apply the overrides file if it exists. A missing file is not an error.
    pub fn apply_overrides_file(&mut self) {
        let Some(path) = self.overrides_file() else {
            return;
        };

        match std::fs::read_to_string(&path) {
            Ok(content) => {
                debug!("Applying overrides from {}", path.display());
                self.apply_overrides(&content);
            }
            Err(e) => debug!("No overrides applied from {}: {}", path.display(), e),
        }
    }

    /// Apply `KEY=value` lines. Comments, blank lines, unknown keys and
    /// malformed values are ignored and leave the current value in place.
    pub fn apply_overrides(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };

            let slot = match key.trim() {
                "IDLE_THRESHOLD_MS" => &mut self.idle_threshold_ms,
                "MEDIA_GRACE_PERIOD_MS" => &mut self.media_grace_ms,
                "LOOP_INTERVAL_MS" => &mut self.poll_interval_ms,
                other => {
                    debug!("Ignoring unknown override key '{}'", other);
                    continue;
                }
            };

            match value.trim().parse::<u64>() {
                Ok(v) => *slot = v,
                Err(_) => debug!("Ignoring malformed value for {}: {:?}", key.trim(), value),
            }
        }
    }

    /// Build validated thresholds from the configured values.
    pub fn thresholds(&self) -> Thresholds {
        let poll_interval_ms = if self.poll_interval_ms == 0 {
            warn!("poll_interval_ms must be positive, using 1000");
            1_000
        } else {
            self.poll_interval_ms
        };

        let idle_threshold_ms = if self.idle_threshold_ms < MIN_IDLE_THRESHOLD_MS {
            warn!(
                "idle_threshold_ms ({}) is too small, using {}",
                self.idle_threshold_ms, MIN_IDLE_THRESHOLD_MS
            );
            MIN_IDLE_THRESHOLD_MS
        } else {
            self.idle_threshold_ms
        };

        // Disengagement needs `idle < reactivity`, so reactivity must stay in [1, idle).
        let reactivity_valid = (1..idle_threshold_ms).contains(&self.reactivity_threshold_ms);
        let reactivity_threshold_ms = if reactivity_valid {
            self.reactivity_threshold_ms
        } else {
            let clamped = (idle_threshold_ms / 2).max(1);
            warn!(
                "reactivity_threshold_ms ({}) must be in 1..{}, using {}",
                self.reactivity_threshold_ms, idle_threshold_ms, clamped
            );
            clamped
        };

        Thresholds {
            idle: Duration::from_millis(idle_threshold_ms),
            reactivity: Duration::from_millis(reactivity_threshold_ms),
            media_grace: Duration::from_millis(self.media_grace_ms),
            audio_grace: Duration::from_millis(self.audio_grace_ms),
            poll_interval: Duration::from_millis(poll_interval_ms),
        }
    }
}

fn default_file(name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(name))
}
