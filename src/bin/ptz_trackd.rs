//! ptz_trackd - PTZ auto-tracking daemon
//!
//! This daemon:
//! 1. Loads and validates the tracker configuration (PTZ_TRACKER_CONFIG + PTZ_* overrides)
//! 2. Builds the detector from the registry and the configured actuator
//! 3. Runs one tracking session until Ctrl-C
//! 4. Accepts operator commands on stdin (enable, disable, nudge <dir>, home, reconnect, status)
//! 5. Logs tracking health every few seconds

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ptz_tracker::actuator;
use ptz_tracker::{
    Actuator, DetectorRegistry, PtzDirection, SceneConfig, SessionEvent, SessionHandle,
    SimulatedHead, SyntheticScene, TrackerConfig, TrackingSession,
};

const HEALTH_LOG_EVERY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "ptz_trackd", about = "Keep a PTZ camera pointed at a tracked subject")]
struct Args {
    /// JSON config file (overrides PTZ_TRACKER_CONFIG).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Start with tracking enabled.
    #[arg(long)]
    enable: bool,

    /// Seed for the synthetic scene.
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Ignore stdin operator commands.
    #[arg(long)]
    no_console: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => TrackerConfig::load_from(Some(path))?,
        None => TrackerConfig::load()?,
    };

    let registry = DetectorRegistry::with_builtin();
    log::info!("detectors available: {}", registry.list().join(", "));
    let detector = registry.build(&config.detector)?;

    // The synthetic scene films through this head; with the simulated actuator the loop is
    // closed, otherwise the scene is open-loop and commands go to the configured actuator.
    let head = SimulatedHead::new();
    let actuator: Box<dyn Actuator> = if config.actuator.kind == "simulated" {
        Box::new(head.clone())
    } else {
        actuator::from_settings(&config.actuator)?
    };
    let mut scene = SyntheticScene::new(
        SceneConfig {
            nominal_fps: config.scheduler.target_fps,
            seed: args.seed,
            ..SceneConfig::default()
        },
        head,
    );

    let (mut session, handle, events) = TrackingSession::start(&config, detector, actuator)?;
    if args.enable {
        handle.enable_tracking();
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let loop_shutdown = Arc::clone(&shutdown);
    let control_loop = thread::Builder::new()
        .name("ptz-session".to_string())
        .spawn(move || -> Result<()> {
            let result = session.run(&mut scene, &loop_shutdown);
            session.shutdown()?;
            result
        })
        .context("spawn session thread")?;

    if !args.no_console {
        spawn_console(handle.clone())?;
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("set Ctrl-C handler")?;

    log::info!("ptz_trackd running (Ctrl-C to stop)");
    loop {
        match rx.recv_timeout(HEALTH_LOG_EVERY) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        for event in events.try_iter() {
            log_event(&event);
        }
        if control_loop.is_finished() {
            break;
        }
        let state = handle.tracking_state();
        let stats = handle.stats();
        log::info!(
            "health phase={} missed={} reacq={} fps={:.1} inference={:.0}ms latency={:.0}ms \
             dropped={} actuator={:?}",
            state.phase,
            state.missed_frame_count,
            state.reacquisitions,
            stats.fps,
            stats.inference_time_ms,
            stats.latency_ms,
            stats.dropped_frames,
            handle.connection()
        );
    }

    log::info!("shutdown signal received, stopping session...");
    shutdown.store(true, Ordering::SeqCst);
    control_loop
        .join()
        .map_err(|_| anyhow!("session thread panicked"))??;
    Ok(())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::PhaseChanged { from, to } => log::debug!("phase {} -> {}", from, to),
        SessionEvent::DetectorUnavailable { consecutive } => log::warn!(
            "detector unavailable {} times in a row; tracking disabled",
            consecutive
        ),
        SessionEvent::ActuatorFailed { sequence, error } => log::error!(
            "actuator failed on command {}: {} (use `reconnect`)",
            sequence,
            error
        ),
        SessionEvent::ActuatorReconnected => log::info!("actuator reconnected"),
    }
}

fn spawn_console(handle: SessionHandle) -> Result<()> {
    thread::Builder::new()
        .name("ptz-console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if let Err(err) = run_console_command(&handle, line.trim()) {
                    log::warn!("{}", err);
                }
            }
        })
        .context("spawn console thread")?;
    Ok(())
}

fn run_console_command(handle: &SessionHandle, line: &str) -> Result<()> {
    let mut words = line.split_whitespace();
    match (words.next(), words.next()) {
        (None, _) => {}
        (Some("enable"), _) => handle.enable_tracking(),
        (Some("disable"), _) => handle.disable_tracking(),
        (Some("nudge"), Some(direction)) => {
            let direction = PtzDirection::parse(direction)
                .ok_or_else(|| anyhow!("unknown direction {:?}", direction))?;
            log::info!("nudge {:?}: {:?}", direction, handle.fine_tune(direction));
        }
        (Some("home"), _) => log::info!("home: {:?}", handle.home()),
        (Some("reconnect"), _) => handle.reconnect_actuator()?,
        (Some("status"), _) => {
            let state = handle.tracking_state();
            println!(
                "{}",
                ptz_tracker::ui::status_line(&state, &handle.stats())
            );
        }
        (Some(other), _) => {
            return Err(anyhow!(
                "unknown command {:?} (enable|disable|nudge <dir>|home|reconnect|status)",
                other
            ))
        }
    }
    Ok(())
}
