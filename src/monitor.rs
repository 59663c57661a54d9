//! Polling loop tying samplers, detector and engine together.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::audio::{AudioActivityDetector, AudioProvider};
use crate::config::Thresholds;
use crate::engine::{Action, DecisionEngine, EngineState, Signals, Surfaces};
use crate::idle::IdleSampler;
use crate::presence::PresenceTracker;
use crate::whitelist::Whitelist;

/// What one tick observed and did.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub idle_ms: u64,
    pub whitelisted_pids: Vec<u32>,
    pub audio_playing: bool,
    pub action: Action,
    pub state: EngineState,
}

/// Owns the configuration context, the providers and the engine.
pub struct Monitor {
    whitelist: Whitelist,
    poll_interval: Duration,
    idle: IdleSampler,
    presence: PresenceTracker,
    audio: Box<dyn AudioProvider>,
    detector: AudioActivityDetector,
    engine: DecisionEngine,
    surfaces: Surfaces,
}

impl Monitor {
    pub fn new(
        whitelist: Whitelist,
        thresholds: &Thresholds,
        idle: IdleSampler,
        presence: PresenceTracker,
        audio: Box<dyn AudioProvider>,
        surfaces: Surfaces,
    ) -> Self {
        Self {
            whitelist,
            poll_interval: thresholds.poll_interval,
            idle,
            presence,
            audio,
            detector: AudioActivityDetector::new(thresholds.audio_grace),
            engine: DecisionEngine::new(thresholds),
            surfaces,
        }
    }

    /// Current engine state.
    pub fn state(&self) -> EngineState {
        self.engine.state()
    }

    /// Run one tick at the current time.
    pub async fn tick(&mut self) -> TickReport {
        self.tick_at(Instant::now()).await
    }

    /// Run one tick at `now`.
    pub async fn tick_at(&mut self, now: Instant) -> TickReport {
        let idle_ms = self.idle.sample().await;
        let pids = self.presence.matching_process_ids(&self.whitelist);
        let whitelist_match = !pids.is_empty();

        let audio_playing = self
            .detector
            .is_playing(now, &pids, self.audio.as_mut())
            .await;

        let signals = Signals {
            idle: Duration::from_millis(idle_ms),
            whitelist_match,
            audio_playing,
        };
        debug!(
            "Tick: idle={}ms whitelisted={} audio={}",
            idle_ms, whitelist_match, audio_playing
        );

        let action = self.engine.step(now, &signals, &mut self.surfaces).await;

        TickReport {
            idle_ms,
            whitelisted_pids: pids.into_iter().collect(),
            audio_playing,
            action,
            state: self.engine.state(),
        }
    }

    /// Tick until `shutdown` is cancelled, then release everything.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Monitor started, polling every {:?}", self.poll_interval);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        self.shutdown().await;
    }

    /// Release the lock surface and restore shell surfaces if locked.
    pub async fn shutdown(&mut self) {
        if self.engine.state() == EngineState::Locked {
            info!("Shutting down while locked, releasing lock surface");
        }
        self.engine.disengage(&mut self.surfaces).await;
    }
}
