//! Idle time sampling.
//!
//! An [`IdleSource`] reports how long the user has been away from keyboard and
//! pointer. [`IdleSampler`] wraps one and turns every failure into "not idle",
//! so a broken source can never lock the screen on its own.

pub mod logind;
pub mod x11;

use std::env;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, trace, warn};

pub use logind::LogindIdleSource;
pub use x11::X11IdleSource;

use crate::config::IdleSourceKind;

const ERROR_LOG_BURST: u32 = 5;
const ERROR_LOG_RATE_LIMIT: u32 = 10; // Log every Nth error after initial burst

/// Source of "milliseconds since last user input".
#[async_trait]
pub trait IdleSource: Send {
    /// Query the current idle time in milliseconds.
    async fn idle_ms(&mut self) -> Result<u64, IdleError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Errors that can occur while sampling idle time.
#[derive(Error, Debug)]
pub enum IdleError {
    #[error("X11 connection failed: {0}")]
    X11Connect(String),

    #[error("X11 request failed: {0}")]
    X11Request(String),

    #[error("DBus error: {0}")]
    DBus(#[from] zbus::Error),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Unexpected property value: {0}")]
    BadProperty(String),
}

/// Fail-open wrapper around an idle source.
pub struct IdleSampler {
    source: Box<dyn IdleSource>,
    failures: u32,
}

impl IdleSampler {
    /// Wrap an idle source.
    pub fn new(source: Box<dyn IdleSource>) -> Self {
        Self {
            source,
            failures: 0,
        }
    }

    /// Open the configured idle source.
    pub async fn open(kind: IdleSourceKind) -> Result<Self, IdleError> {
        let source: Box<dyn IdleSource> = match kind {
            IdleSourceKind::X11 => Box::new(X11IdleSource::connect()?),
            IdleSourceKind::Logind => Box::new(LogindIdleSource::connect().await?),
            IdleSourceKind::Auto => {
                if env::var_os("DISPLAY").is_some() {
                    match X11IdleSource::connect() {
                        Ok(source) => Box::new(source),
                        Err(e) => {
                            warn!("X11 idle source unavailable ({}), trying logind", e);
                            Box::new(LogindIdleSource::connect().await?)
                        }
                    }
                } else {
                    Box::new(LogindIdleSource::connect().await?)
                }
            }
        };

        info!("Using {} idle source", source.name());
        Ok(Self::new(source))
    }

    /// Milliseconds since last input, or 0 if the source failed.
    pub async fn sample(&mut self) -> u64 {
        match self.source.idle_ms().await {
            Ok(ms) => {
                self.failures = 0;
                trace!("Idle for {} ms", ms);
                ms
            }
            Err(e) => {
                // Rate-limit error logging
                let count = self.failures;
                self.failures = self.failures.saturating_add(1);
                if count < ERROR_LOG_BURST || count % ERROR_LOG_RATE_LIMIT == 0 {
                    warn!("Idle query via {} failed: {}", self.source.name(), e);
                }
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedSource {
        replies: Vec<Result<u64, IdleError>>,
    }

    #[async_trait]
    impl IdleSource for ScriptedSource {
        async fn idle_ms(&mut self) -> Result<u64, IdleError> {
            self.replies.remove(0)
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn test_sample_passes_through() {
        let mut sampler = IdleSampler::new(Box::new(ScriptedSource {
            replies: vec![Ok(42), Ok(130_000)],
        }));

        assert_eq!(sampler.sample().await, 42);
        assert_eq!(sampler.sample().await, 130_000);
    }

    #[tokio::test]
    async fn test_sample_failure_reads_as_active() {
        let mut sampler = IdleSampler::new(Box::new(ScriptedSource {
            replies: vec![
                Ok(500_000),
                Err(IdleError::X11Request("connection reset".to_string())),
                Ok(7),
            ],
        }));

        assert_eq!(sampler.sample().await, 500_000);
        assert_eq!(sampler.sample().await, 0);
        assert_eq!(sampler.failures, 1);
        assert_eq!(sampler.sample().await, 7);
        assert_eq!(sampler.failures, 0);
    }
}
