//! "Is media playing" detection with a short grace window.
//!
//! A peak above [`PEAK_THRESHOLD`] is the authoritative signal and re-anchors
//! the grace window. A silent but open session keeps reading as playing until
//! the window since the last anchor runs out, which bridges gaps between
//! tracks without treating a paused player as playing forever.

use std::cmp;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use super::{AudioError, AudioProvider};

/// Peak level above which a session counts as audible.
pub const PEAK_THRESHOLD: f32 = 0.001;

const REINIT_BACKOFF_INITIAL: Duration = Duration::from_secs(5);
const REINIT_BACKOFF_MAX: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProviderHealth {
    Healthy,
    /// Provider failed as a whole; next reinitialization allowed at `retry_at`.
    Degraded { retry_at: Instant, backoff: Duration },
}

/// Decides whether any candidate process is producing audio.
#[derive(Debug)]
pub struct AudioActivityDetector {
    grace: Duration,
    last_active_at: Option<Instant>,
    health: ProviderHealth,
}

impl AudioActivityDetector {
    /// Create a detector with the given grace window.
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            last_active_at: None,
            health: ProviderHealth::Healthy,
        }
    }

    /// When audio was last confirmed (or a session first seen), if at all.
    pub fn last_active_at(&self) -> Option<Instant> {
        self.last_active_at
    }

    /// Whether the provider is currently considered unavailable.
    pub fn is_degraded(&self) -> bool {
        matches!(self.health, ProviderHealth::Degraded { .. })
    }

    /// Check the candidate processes for audible sessions at `now`.
    pub async fn is_playing(
        &mut self,
        now: Instant,
        pids: &BTreeSet<u32>,
        provider: &mut dyn AudioProvider,
    ) -> bool {
        if pids.is_empty() {
            self.last_active_at = None;
            return false;
        }

        if !self.ensure_available(now, provider).await {
            return false;
        }

        let mut playing = false;
        let mut has_open_session = false;

        for &pid in pids {
            let sessions = match provider.sessions_for(pid).await {
                Ok(sessions) => sessions,
                Err(AudioError::Unavailable(reason)) => {
                    // Soft signals already gathered this tick are dropped too.
                    self.mark_degraded(now, &reason);
                    return false;
                }
                Err(e) => {
                    debug!("Skipping pid {}: {}", pid, e);
                    continue;
                }
            };

            for session in sessions.iter().filter(|s| s.state.is_open()) {
                has_open_session = true;
                let anchor = *self.last_active_at.get_or_insert(now);

                if session.peak_level > PEAK_THRESHOLD {
                    trace!("pid {} audible (peak {:.4})", pid, session.peak_level);
                    self.last_active_at = Some(now);
                    return true;
                }

                if now.saturating_duration_since(anchor) <= self.grace {
                    trace!("pid {} silent, within grace window", pid);
                    playing = true;
                }
            }
        }

        if !has_open_session {
            self.last_active_at = None;
        }

        playing
    }

    /// Returns true if the provider may be queried this tick.
    async fn ensure_available(&mut self, now: Instant, provider: &mut dyn AudioProvider) -> bool {
        let ProviderHealth::Degraded { retry_at, backoff } = self.health else {
            return true;
        };

        if now < retry_at {
            return false;
        }

        match provider.reinitialize().await {
            Ok(()) => {
                info!("Audio provider reinitialized");
                self.health = ProviderHealth::Healthy;
                true
            }
            Err(e) => {
                warn!("Audio reinitialization failed, retrying in {:?}: {}", backoff, e);
                self.health = ProviderHealth::Degraded {
                    retry_at: now + backoff,
                    backoff: cmp::min(backoff * 2, REINIT_BACKOFF_MAX),
                };
                false
            }
        }
    }

    fn mark_degraded(&mut self, now: Instant, reason: &str) {
        if self.health == ProviderHealth::Healthy {
            warn!("Audio provider unavailable: {}", reason);
            // One reinitialization attempt on the next tick, then back off.
            self.health = ProviderHealth::Degraded {
                retry_at: now,
                backoff: REINIT_BACKOFF_INITIAL,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioSession, SessionState};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};

    #[derive(Default)]
    struct FakeAudio {
        sessions: HashMap<u32, Vec<AudioSession>>,
        failing: HashSet<u32>,
        unavailable: bool,
        reinit_succeeds: bool,
        queries: usize,
        reinits: usize,
    }

    impl FakeAudio {
        fn with(pid: u32, sessions: Vec<AudioSession>) -> Self {
            let mut fake = Self::default();
            fake.sessions.insert(pid, sessions);
            fake
        }
    }

    #[async_trait]
    impl AudioProvider for FakeAudio {
        async fn sessions_for(&mut self, pid: u32) -> Result<Vec<AudioSession>, AudioError> {
            self.queries += 1;
            if self.unavailable {
                return Err(AudioError::Unavailable("no audio service".to_string()));
            }
            if self.failing.contains(&pid) {
                return Err(AudioError::Query {
                    pid,
                    reason: "gone".to_string(),
                });
            }
            Ok(self.sessions.get(&pid).cloned().unwrap_or_default())
        }

        async fn reinitialize(&mut self) -> Result<(), AudioError> {
            self.reinits += 1;
            if self.reinit_succeeds {
                self.unavailable = false;
                Ok(())
            } else {
                Err(AudioError::Unavailable("still down".to_string()))
            }
        }
    }

    const GRACE: Duration = Duration::from_secs(5);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn loud() -> AudioSession {
        AudioSession::new(SessionState::Active, 0.4)
    }

    fn silent(state: SessionState) -> AudioSession {
        AudioSession::new(state, 0.0)
    }

    #[tokio::test]
    async fn test_empty_candidates_not_playing_and_clears_anchor() {
        let t0 = Instant::now();
        let mut audio = FakeAudio::with(1, vec![silent(SessionState::Active)]);
        let mut detector = AudioActivityDetector::new(GRACE);

        assert!(detector.is_playing(t0, &BTreeSet::from([1]), &mut audio).await);
        assert_eq!(detector.last_active_at(), Some(t0));

        assert!(!detector.is_playing(t0 + ms(100), &BTreeSet::new(), &mut audio).await);
        assert_eq!(detector.last_active_at(), None);
    }

    #[tokio::test]
    async fn test_peak_above_threshold_is_playing() {
        let t0 = Instant::now();
        let mut audio = FakeAudio::with(7, vec![loud()]);
        let mut detector = AudioActivityDetector::new(GRACE);

        assert!(detector.is_playing(t0, &BTreeSet::from([7]), &mut audio).await);
        assert_eq!(detector.last_active_at(), Some(t0));
    }

    #[tokio::test]
    async fn test_peak_at_threshold_is_silence() {
        let t0 = Instant::now();
        let mut audio = FakeAudio::with(7, vec![AudioSession::new(SessionState::Active, PEAK_THRESHOLD)]);
        let mut detector = AudioActivityDetector::new(GRACE);
        let pids = BTreeSet::from([7]);

        // First sighting anchors the window, so it still reads as playing.
        assert!(detector.is_playing(t0, &pids, &mut audio).await);
        assert!(!detector.is_playing(t0 + GRACE + ms(1), &pids, &mut audio).await);
    }

    #[tokio::test]
    async fn test_silent_session_bridged_by_grace() {
        let t0 = Instant::now();
        let mut audio = FakeAudio::with(7, vec![loud()]);
        let mut detector = AudioActivityDetector::new(GRACE);
        let pids = BTreeSet::from([7]);

        assert!(detector.is_playing(t0, &pids, &mut audio).await);

        audio.sessions.insert(7, vec![silent(SessionState::Active)]);
        assert!(detector.is_playing(t0 + ms(2_000), &pids, &mut audio).await);
        assert!(detector.is_playing(t0 + GRACE, &pids, &mut audio).await);
        assert!(!detector.is_playing(t0 + GRACE + ms(1), &pids, &mut audio).await);
        // Anchor is not moved by silence.
        assert_eq!(detector.last_active_at(), Some(t0));
    }

    #[tokio::test]
    async fn test_peak_refreshes_anchor_long_after_grace() {
        let t0 = Instant::now();
        let mut audio = FakeAudio::with(7, vec![silent(SessionState::Inactive)]);
        let mut detector = AudioActivityDetector::new(GRACE);
        let pids = BTreeSet::from([7]);

        assert!(detector.is_playing(t0, &pids, &mut audio).await);
        assert!(!detector.is_playing(t0 + ms(60_000), &pids, &mut audio).await);

        audio.sessions.insert(7, vec![silent(SessionState::Inactive), loud()]);
        let later = t0 + ms(61_000);
        assert!(detector.is_playing(later, &pids, &mut audio).await);
        assert_eq!(detector.last_active_at(), Some(later));
    }

    #[tokio::test]
    async fn test_expired_sessions_ignored_and_anchor_cleared() {
        let t0 = Instant::now();
        let mut audio = FakeAudio::with(7, vec![loud()]);
        let mut detector = AudioActivityDetector::new(GRACE);
        let pids = BTreeSet::from([7]);

        assert!(detector.is_playing(t0, &pids, &mut audio).await);

        audio
            .sessions
            .insert(7, vec![AudioSession::new(SessionState::Expired, 0.9)]);
        assert!(!detector.is_playing(t0 + ms(1_000), &pids, &mut audio).await);
        assert_eq!(detector.last_active_at(), None);
    }

    #[tokio::test]
    async fn test_no_sessions_clears_anchor() {
        let t0 = Instant::now();
        let mut audio = FakeAudio::with(7, vec![silent(SessionState::Active)]);
        let mut detector = AudioActivityDetector::new(GRACE);
        let pids = BTreeSet::from([7]);

        assert!(detector.is_playing(t0, &pids, &mut audio).await);
        audio.sessions.clear();
        assert!(!detector.is_playing(t0 + ms(1_000), &pids, &mut audio).await);
        assert_eq!(detector.last_active_at(), None);

        // A session reappearing starts a fresh window.
        audio.sessions.insert(7, vec![silent(SessionState::Active)]);
        let t1 = t0 + ms(30_000);
        assert!(detector.is_playing(t1, &pids, &mut audio).await);
        assert_eq!(detector.last_active_at(), Some(t1));
    }

    #[tokio::test]
    async fn test_per_process_error_skipped() {
        let t0 = Instant::now();
        let mut audio = FakeAudio::with(8, vec![loud()]);
        audio.failing.insert(3);
        let mut detector = AudioActivityDetector::new(GRACE);

        assert!(detector.is_playing(t0, &BTreeSet::from([3, 8]), &mut audio).await);
        assert!(!detector.is_degraded());
    }

    #[tokio::test]
    async fn test_total_failure_reinitializes_once_then_backs_off() {
        let t0 = Instant::now();
        let mut audio = FakeAudio::with(7, vec![loud()]);
        audio.unavailable = true;
        let mut detector = AudioActivityDetector::new(GRACE);
        let pids = BTreeSet::from([7]);

        assert!(!detector.is_playing(t0, &pids, &mut audio).await);
        assert!(detector.is_degraded());
        assert_eq!(audio.reinits, 0);

        // Next tick: one reinitialization attempt, which fails.
        assert!(!detector.is_playing(t0 + ms(1_000), &pids, &mut audio).await);
        assert_eq!(audio.reinits, 1);
        let queries = audio.queries;

        // Following ticks inside the backoff do not touch the provider.
        assert!(!detector.is_playing(t0 + ms(2_000), &pids, &mut audio).await);
        assert!(!detector.is_playing(t0 + ms(3_000), &pids, &mut audio).await);
        assert_eq!(audio.reinits, 1);
        assert_eq!(audio.queries, queries);

        // Backoff elapsed and the subsystem is back.
        audio.reinit_succeeds = true;
        assert!(detector.is_playing(t0 + ms(6_000), &pids, &mut audio).await);
        assert_eq!(audio.reinits, 2);
        assert!(!detector.is_degraded());
    }

    #[tokio::test]
    async fn test_reinit_backoff_doubles() {
        let t0 = Instant::now();
        let mut audio = FakeAudio::with(7, vec![loud()]);
        audio.unavailable = true;
        let mut detector = AudioActivityDetector::new(GRACE);
        let pids = BTreeSet::from([7]);

        detector.is_playing(t0, &pids, &mut audio).await;
        detector.is_playing(t0 + ms(1_000), &pids, &mut audio).await; // fails, retry at +6s
        detector.is_playing(t0 + ms(6_000), &pids, &mut audio).await; // fails, retry at +16s
        assert_eq!(audio.reinits, 2);

        detector.is_playing(t0 + ms(15_000), &pids, &mut audio).await;
        assert_eq!(audio.reinits, 2);
        detector.is_playing(t0 + ms(16_000), &pids, &mut audio).await;
        assert_eq!(audio.reinits, 3);
    }

    struct OutageAfterFirst {
        inner: FakeAudio,
        answered: usize,
    }

    #[async_trait]
    impl AudioProvider for OutageAfterFirst {
        async fn sessions_for(&mut self, pid: u32) -> Result<Vec<AudioSession>, AudioError> {
            if self.answered > 0 {
                return Err(AudioError::Unavailable("audio service crashed".to_string()));
            }
            self.answered += 1;
            self.inner.sessions_for(pid).await
        }

        async fn reinitialize(&mut self) -> Result<(), AudioError> {
            self.inner.reinitialize().await
        }
    }

    #[tokio::test]
    async fn test_outage_mid_scan_drops_soft_signal() {
        let t0 = Instant::now();
        let mut detector = AudioActivityDetector::new(GRACE);
        let pids = BTreeSet::from([3, 8]);

        // Anchor the window so pid 3's silent session reads as soft playing.
        let mut warmup = FakeAudio::with(3, vec![silent(SessionState::Active)]);
        assert!(detector.is_playing(t0, &pids, &mut warmup).await);

        let mut audio = OutageAfterFirst {
            inner: FakeAudio::with(3, vec![silent(SessionState::Active)]),
            answered: 0,
        };
        assert!(!detector.is_playing(t0 + ms(1_000), &pids, &mut audio).await);
        assert_eq!(audio.answered, 1);
        assert!(detector.is_degraded());
    }
}
