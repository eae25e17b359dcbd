use std::time::{Duration, Instant};

use ptz_tracker::config::DetectorSettings;
use ptz_tracker::{
    DetectorRegistry, SceneConfig, SessionEvent, SessionHandle, SimulatedHead, SyntheticScene,
    TrackerConfig, TrackingMode, TrackingPhase, TrackingSession,
};

fn config(mode: TrackingMode) -> TrackerConfig {
    let mut config = TrackerConfig::default();
    config.scheduler.target_fps = 20.0;
    config.scheduler.detection_timeout = Duration::from_secs(2);
    config.dispatcher.min_interval = Duration::from_millis(20);
    config.detector = DetectorSettings {
        backend: Some("blob".to_string()),
        mode,
        subject_label: None,
    };
    config
}

fn scene(head: &SimulatedHead, dropout: f64) -> SyntheticScene {
    SyntheticScene::new(
        SceneConfig {
            amplitude: 0.3,
            period_s: 6.0,
            nominal_fps: 20.0,
            noise: 20,
            dropout,
            bitrate_kbps: Some(2500),
            ..SceneConfig::default()
        },
        head.clone(),
    )
}

fn start(
    mode: TrackingMode,
    head: &SimulatedHead,
) -> (
    TrackingSession,
    SessionHandle,
    std::sync::mpsc::Receiver<SessionEvent>,
) {
    let config = config(mode);
    let detector = DetectorRegistry::with_builtin()
        .build(&config.detector)
        .expect("build detector");
    TrackingSession::start(&config, detector, Box::new(head.clone())).expect("start session")
}

/// Step in real time for `duration`, stopping early once `done` holds.
fn run_for(
    session: &mut TrackingSession,
    scene: &mut SyntheticScene,
    duration: Duration,
    mut done: impl FnMut(&TrackingSession) -> bool,
) -> bool {
    let started = Instant::now();
    while started.elapsed() < duration {
        session.step(scene, Instant::now()).expect("step");
        if done(session) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn closed_loop_follows_the_synthetic_subject() {
    let head = SimulatedHead::new();
    let mut scene = scene(&head, 0.0);
    let (mut session, handle, events) = start(TrackingMode::DetectionOnly, &head);

    handle.enable_tracking();
    assert!(run_for(
        &mut session,
        &mut scene,
        Duration::from_secs(5),
        |s| s.tracking_state().phase.is_following()
    ));

    let mut visible = 0u32;
    let mut frames = 0u32;
    let mut last_frame = scene.frames_captured();
    let started = Instant::now();
    while started.elapsed() < Duration::from_secs(2) {
        session.step(&mut scene, Instant::now()).expect("step");
        if scene.frames_captured() != last_frame {
            last_frame = scene.frames_captured();
            frames += 1;
            if scene.subject_in_frame().is_some() {
                visible += 1;
            }
        }
        std::thread::sleep(Duration::from_millis(2));
    }

    assert!(head.commands_sent() > 0, "head never moved");
    assert!(frames > 0);
    assert!(visible * 10 >= frames * 8, "subject left the frame: {visible}/{frames}");

    let stats = handle.stats();
    assert_eq!(stats.model_name, "blob");
    assert!(stats.fps > 0.0);
    assert!(stats.object_count <= 1);
    assert_eq!(stats.bitrate_kbps, Some(2500));

    let seen: Vec<SessionEvent> = events.try_iter().collect();
    assert!(seen.contains(&SessionEvent::PhaseChanged {
        from: TrackingPhase::Searching,
        to: TrackingPhase::Tracking
    }));
    session.shutdown().expect("shutdown");
}

#[test]
fn hybrid_mode_reaches_tracking() {
    let head = SimulatedHead::new();
    let mut scene = scene(&head, 0.0);
    let (mut session, handle, _events) = start(TrackingMode::Hybrid, &head);

    handle.enable_tracking();
    // The first accepted box comes from full detection and carries no id; the tracker
    // takes over from the next request.
    assert!(run_for(
        &mut session,
        &mut scene,
        Duration::from_secs(5),
        |s| s.tracking_state().tracked_frames > 0
    ));
    let state = session.tracking_state();
    assert!(state.phase.is_following());
    assert!(state.locked_subject_id.is_some());
    session.shutdown().expect("shutdown");
}

#[test]
fn subject_never_seen_keeps_searching_without_moving() {
    let head = SimulatedHead::new();
    let mut scene = scene(&head, 1.0);
    let (mut session, handle, _events) = start(TrackingMode::DetectionOnly, &head);

    handle.enable_tracking();
    run_for(&mut session, &mut scene, Duration::from_millis(800), |_| false);

    assert_eq!(handle.tracking_state().phase, TrackingPhase::Searching);
    assert!(scene.frames_captured() > 0);
    assert_eq!(head.commands_sent(), 0);
    session.shutdown().expect("shutdown");
}

#[test]
fn disabling_stops_automatic_motion() {
    let head = SimulatedHead::new();
    let mut scene = scene(&head, 0.0);
    let (mut session, handle, _events) = start(TrackingMode::DetectionOnly, &head);

    handle.enable_tracking();
    assert!(run_for(
        &mut session,
        &mut scene,
        Duration::from_secs(5),
        |s| s.tracking_state().phase.is_following()
    ));

    handle.disable_tracking();
    // Let any command already handed to the actuator finish.
    run_for(&mut session, &mut scene, Duration::from_millis(200), |_| false);
    let sent = head.commands_sent();
    let frames = scene.frames_captured();
    run_for(&mut session, &mut scene, Duration::from_millis(500), |_| false);

    assert_eq!(handle.tracking_state().phase, TrackingPhase::Idle);
    assert_eq!(head.commands_sent(), sent);
    assert_eq!(scene.frames_captured(), frames);
    session.shutdown().expect("shutdown");
}
