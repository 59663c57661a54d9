//! Lock decision state machine.
//!
//! Rules, in evaluation order:
//! - Track the media edge: playing → silent records when media stopped,
//!   silent → playing forgets it.
//! - Engage when idle past the threshold and unlocked, if no whitelisted
//!   process runs, or one runs silently and the media grace since the last
//!   stop has passed.
//! - Disengage when input resumed (idle below the re-activity threshold),
//!   whatever the media state.
//!
//! The held lock session is the only source of truth for the lock state, so a
//! repeated engage or disengage can never spawn or release twice.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Thresholds;
use crate::lock::{LockHandle, LockSurface};
use crate::shell::ShellVisibility;

const ERROR_LOG_BURST: u32 = 5;
const ERROR_LOG_RATE_LIMIT: u32 = 10; // Log every Nth failure after initial burst

/// Lock state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Unlocked,
    Locked,
}

/// Action decided for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Engage,
    Disengage,
    None,
}

/// Inputs sampled for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signals {
    pub idle: Duration,
    pub whitelist_match: bool,
    /// Only meaningful when `whitelist_match` is true.
    pub audio_playing: bool,
}

/// Everything the engine drives on engage/disengage.
pub struct Surfaces {
    pub lock: Box<dyn LockSurface>,
    pub shell: Option<Box<dyn ShellVisibility>>,
}

/// A held lock: the spawned surface and whether shell surfaces were hidden.
#[derive(Debug)]
struct LockSession {
    handle: LockHandle,
    shell_hidden: bool,
}

/// The lock/unlock decision engine.
#[derive(Debug)]
pub struct DecisionEngine {
    idle_threshold: Duration,
    reactivity_threshold: Duration,
    media_grace: Duration,
    was_playing: bool,
    media_stopped_at: Option<Instant>,
    session: Option<LockSession>,
    spawn_failures: u32,
}

impl DecisionEngine {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            idle_threshold: thresholds.idle,
            reactivity_threshold: thresholds.reactivity,
            media_grace: thresholds.media_grace,
            was_playing: false,
            media_stopped_at: None,
            session: None,
            spawn_failures: 0,
        }
    }

    /// Current lock state, derived from the held session.
    pub fn state(&self) -> EngineState {
        if self.session.is_some() {
            EngineState::Locked
        } else {
            EngineState::Unlocked
        }
    }

    /// Handle of the held lock surface, if any.
    pub fn handle(&self) -> Option<LockHandle> {
        self.session.as_ref().map(|s| s.handle)
    }

    /// When media last stopped, if it has since the last engagement.
    pub fn media_stopped_at(&self) -> Option<Instant> {
        self.media_stopped_at
    }

    /// Decide the action for this tick and update the media edge tracking.
    pub fn decide(&mut self, now: Instant, signals: &Signals) -> Action {
        let audio_playing = signals.whitelist_match && signals.audio_playing;

        if self.was_playing && !audio_playing {
            debug!("Media stopped");
            self.media_stopped_at = Some(now);
        } else if !self.was_playing && audio_playing {
            debug!("Media started");
            self.media_stopped_at = None;
        }
        self.was_playing = audio_playing;

        match self.state() {
            EngineState::Unlocked if signals.idle > self.idle_threshold => {
                if self.should_engage(now, signals.whitelist_match, audio_playing) {
                    Action::Engage
                } else {
                    Action::None
                }
            }
            EngineState::Locked if signals.idle < self.reactivity_threshold => Action::Disengage,
            _ => Action::None,
        }
    }

    fn should_engage(&self, now: Instant, whitelist_match: bool, audio_playing: bool) -> bool {
        if !whitelist_match {
            return true;
        }

        if audio_playing {
            debug!("Idle, but trusted media is playing");
            return false;
        }

        match self.media_stopped_at {
            None => true,
            Some(stopped) => {
                let since = now.saturating_duration_since(stopped);
                if since > self.media_grace {
                    true
                } else {
                    debug!("Media stopped {:?} ago, within grace", since);
                    false
                }
            }
        }
    }

    /// Decide and perform this tick's action.
    ///
    /// Returns the action actually performed: a failed spawn reports
    /// [`Action::None`].
    pub async fn step(&mut self, now: Instant, signals: &Signals, surfaces: &mut Surfaces) -> Action {
        match self.decide(now, signals) {
            Action::Engage => {
                if self.spawn_failures == 0 {
                    info!(
                        "Idle for {:?} (whitelisted running: {}), engaging",
                        signals.idle, signals.whitelist_match
                    );
                }
                if self.engage(surfaces).await {
                    Action::Engage
                } else {
                    Action::None
                }
            }
            Action::Disengage => {
                info!("Activity resumed, disengaging");
                self.disengage(surfaces).await;
                Action::Disengage
            }
            Action::None => Action::None,
        }
    }

    /// Spawn the lock surface. No-op while a lock is already held.
    ///
    /// Returns true if a lock is held afterwards.
    pub async fn engage(&mut self, surfaces: &mut Surfaces) -> bool {
        if self.session.is_some() {
            return true;
        }

        // Captured once, before the lock surface takes focus.
        let hide_shell = surfaces.shell.as_mut().is_some_and(|shell| {
            shell.is_foreground_shell_surface().unwrap_or_else(|e| {
                warn!("Shell surface query failed: {}", e);
                false
            })
        });

        let handle = match surfaces.lock.spawn().await {
            Ok(handle) => handle,
            Err(e) => {
                // Rate-limit error logging
                let count = self.spawn_failures;
                self.spawn_failures = self.spawn_failures.saturating_add(1);
                if count < ERROR_LOG_BURST || count % ERROR_LOG_RATE_LIMIT == 0 {
                    warn!("Failed to engage lock surface: {}", e);
                }
                return false;
            }
        };
        self.spawn_failures = 0;

        let mut shell_hidden = false;
        if hide_shell && let Some(shell) = surfaces.shell.as_mut() {
            match shell.hide() {
                Ok(()) => shell_hidden = true,
                Err(e) => warn!("Failed to hide shell surfaces: {}", e),
            }
        }

        self.media_stopped_at = None;
        self.session = Some(LockSession {
            handle,
            shell_hidden,
        });
        true
    }

    /// Release the lock surface. No-op while no lock is held.
    pub async fn disengage(&mut self, surfaces: &mut Surfaces) {
        let Some(session) = self.session.take() else {
            return;
        };

        if let Err(e) = surfaces.lock.terminate(session.handle).await {
            warn!("Failed to terminate lock surface: {}", e);
        }

        if session.shell_hidden
            && let Some(shell) = surfaces.shell.as_mut()
            && let Err(e) = shell.show()
        {
            warn!("Failed to restore shell surfaces: {}", e);
        }
    }
}
