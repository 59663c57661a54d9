//! idlelockd - Systemd user daemon that blanks an idle screen.
//!
//! Starts the configured lock surface once the session has been idle long
//! enough, unless a whitelisted application is playing media.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use idlelockd::audio::{AudioProvider, MprisAudio};
use idlelockd::config::Config;
use idlelockd::engine::Surfaces;
use idlelockd::idle::IdleSampler;
use idlelockd::instance::{InstanceError, InstanceGuard};
use idlelockd::lock::{CommandLockSurface, DryRunLockSurface, LockSurface};
use idlelockd::monitor::Monitor;
use idlelockd::presence::{PresenceTracker, SysinfoProcesses};
use idlelockd::shell::{ShellVisibility, X11ShellSurfaces};
use idlelockd::whitelist::Whitelist;

/// Idle screen locker that stays out of the way of media playback.
#[derive(Parser, Debug)]
#[command(name = "idlelockd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable dry-run mode (log instead of starting the lock surface).
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run a single tick, print its report as JSON, then exit.
    #[arg(long)]
    oneshot: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("idlelockd v{} starting", env!("CARGO_PKG_VERSION"));

    // Claimed before the config is read: a duplicate exits 0 even with a broken config.
    let _guard = if args.oneshot {
        None
    } else {
        match InstanceGuard::acquire().await {
            Ok(guard) => Some(guard),
            Err(InstanceError::AlreadyRunning) => {
                info!("Another instance is already running, exiting");
                return Ok(());
            }
            Err(e) => return Err(e).context("Failed to acquire instance lock"),
        }
    };

    let mut config =
        Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    config.apply_overrides_file();

    // Oneshot is a diagnostic: never start a real lock surface for it.
    if args.dry_run || args.oneshot {
        config.dry_run = true;
    }

    info!(
        "Configuration loaded (idle_threshold_ms={}, media_grace_ms={}, dry_run={})",
        config.idle_threshold_ms, config.media_grace_ms, config.dry_run
    );

    if args.oneshot {
        return run_oneshot(&config).await;
    }

    let mut monitor = build_monitor(&config).await?;

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone())?;

    monitor.run(shutdown).await;

    info!("idlelockd stopped");
    Ok(())
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("idlelockd={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

/// Run one tick and print what it saw.
async fn run_oneshot(config: &Config) -> Result<()> {
    let mut monitor = build_monitor(config).await?;

    let report = monitor.tick().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    monitor.shutdown().await;
    Ok(())
}

/// Wire up providers from configuration.
async fn build_monitor(config: &Config) -> Result<Monitor> {
    let thresholds = config.thresholds();
    let whitelist = Whitelist::load(config.whitelist_file().as_deref());

    let idle = IdleSampler::open(config.idle_source)
        .await
        .context("Failed to open idle source")?;

    let presence = PresenceTracker::new(Box::new(SysinfoProcesses::new()));

    // Audio is optional: without it whitelisted apps simply never count as playing.
    let audio: Box<dyn AudioProvider> = match MprisAudio::connect().await {
        Ok(audio) => Box::new(audio),
        Err(e) => {
            warn!("{}. Media detection degraded until the session bus returns.", e);
            Box::new(MprisAudio::disconnected())
        }
    };

    let lock: Box<dyn LockSurface> = if config.dry_run {
        Box::new(DryRunLockSurface::default())
    } else {
        Box::new(
            CommandLockSurface::new(&config.lock_command)
                .context("Invalid lock_command in configuration")?,
        )
    };

    let shell: Option<Box<dyn ShellVisibility>> = if config.hide_shell_surfaces {
        match X11ShellSurfaces::connect() {
            Ok(shell) => Some(Box::new(shell)),
            Err(e) => {
                warn!("Shell surface hiding unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    Ok(Monitor::new(
        whitelist,
        &thresholds,
        idle,
        presence,
        audio,
        Surfaces { lock, shell },
    ))
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
fn spawn_signal_listener(shutdown: CancellationToken) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for SIGINT: {}", e);
                }
                info!("Received SIGINT, shutting down");
            }
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        }
        shutdown.cancel();
    });

    Ok(())
}
