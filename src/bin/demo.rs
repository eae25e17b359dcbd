//! demo - closed-loop synthetic run of the PTZ tracker
//!
//! A bright subject wanders through a simulated scene filmed by a simulated PTZ head. The
//! blob detector finds it, the session steers the head, and the final statistics are
//! printed as JSON on stdout.

use anyhow::{anyhow, Result};
use clap::Parser;
use serde_json::json;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

use ptz_tracker::config::DetectorSettings;
use ptz_tracker::ui::Ui;
use ptz_tracker::{
    DetectorRegistry, OperationProfile, SceneConfig, SessionEvent, SimulatedHead, SyntheticScene, TrackerConfig,
    TrackingMode, TrackingPhase, TrackingSession,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Run length in seconds.
    #[arg(long, default_value_t = 10)]
    seconds: u64,
    /// Operation profile (smooth|precise|balanced|fast|minimal).
    #[arg(long, value_name = "NAME")]
    profile: Option<String>,
    /// Detection rate; overrides the profile's.
    #[arg(long)]
    fps: Option<f32>,
    /// Seed for scene noise and dropout.
    #[arg(long, default_value_t = 7)]
    seed: u64,
    /// Probability that the subject is missing from a frame.
    #[arg(long, default_value_t = 0.05)]
    dropout: f64,
    /// Follow the subject with the stateful tracker after the first detection.
    #[arg(long)]
    hybrid: bool,
    /// Keep the subject at this size (fraction of the frame) by zooming.
    #[arg(long, value_name = "FRACTION")]
    target_size: Option<f32>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if args.seconds == 0 {
        return Err(anyhow!("seconds must be >= 1"));
    }
    let ui = Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal());

    let mut config = match args.profile.as_deref() {
        Some(name) => TrackerConfig::with_profile(
            OperationProfile::parse(name).ok_or_else(|| anyhow!("unknown profile '{}'", name))?,
        ),
        None => TrackerConfig::default(),
    };
    if let Some(fps) = args.fps {
        config.scheduler.target_fps = fps;
    }
    config.controller.target_size = args.target_size;
    config.detector = DetectorSettings {
        backend: Some("blob".to_string()),
        mode: if args.hybrid {
            TrackingMode::Hybrid
        } else {
            TrackingMode::DetectionOnly
        },
        subject_label: None,
    };
    config.validate()?;

    let head = SimulatedHead::new();
    let (mut session, handle, events) = {
        let _stage = ui.stage("Start tracking session");
        let detector = DetectorRegistry::with_builtin().build(&config.detector)?;
        TrackingSession::start(&config, detector, Box::new(head.clone()))?
    };
    let mut scene = SyntheticScene::new(
        SceneConfig {
            nominal_fps: config.scheduler.target_fps,
            dropout: args.dropout,
            seed: args.seed,
            ..SceneConfig::default()
        },
        head.clone(),
    );

    let total = Duration::from_secs(args.seconds);
    let mut progress = ui.run_progress(total);
    let mut offsets = Vec::new();
    let mut locked_steps = 0u64;
    let mut steps = 0u64;
    let mut last_frame = 0;

    handle.enable_tracking();
    let started = Instant::now();
    while started.elapsed() < total {
        session.step(&mut scene, Instant::now())?;
        steps += 1;
        if session.tracking_state().phase == TrackingPhase::Locked {
            locked_steps += 1;
        }
        if scene.frames_captured() != last_frame {
            last_frame = scene.frames_captured();
            if let Some((x, y)) = scene.subject_in_frame() {
                offsets.push((x - 0.5).abs().max((y - 0.5).abs()));
            }
        }
        progress.update(started.elapsed(), session.tracking_state(), session.stats());
        std::thread::sleep(Duration::from_millis(2));
    }
    progress.finish();
    handle.disable_tracking();

    let events: Vec<SessionEvent> = events.try_iter().collect();
    let phase_changes = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::PhaseChanged { .. }))
        .count();
    let state = handle.tracking_state();
    let stats = handle.stats();
    let mean_offset = if offsets.is_empty() {
        None
    } else {
        Some(offsets.iter().sum::<f32>() / offsets.len() as f32)
    };

    let report = json!({
        "seconds": args.seconds,
        "frames_captured": scene.frames_captured(),
        "commands_sent": head.commands_sent(),
        "head": head.position(),
        "final_phase": state.phase,
        "reacquisitions": state.reacquisitions,
        "locked_fraction": locked_steps as f64 / steps.max(1) as f64,
        "mean_center_offset": mean_offset,
        "phase_changes": phase_changes,
        "actuator": handle.connection(),
        "stats": *stats,
    });
    {
        let _stage = ui.stage("Stop tracking session");
        session.shutdown()?;
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
