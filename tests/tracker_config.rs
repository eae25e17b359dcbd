use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use ptz_tracker::config::TrackerConfig;
use ptz_tracker::{OperationProfile, TrackingMode};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PTZ_TRACKER_CONFIG",
        "PTZ_TARGET_FPS",
        "PTZ_PROFILE",
        "PTZ_DEADZONE",
        "PTZ_DEADZONE_X",
        "PTZ_DEADZONE_Y",
        "PTZ_MIN_CONFIDENCE",
        "PTZ_MIN_INTERVAL_MS",
        "PTZ_DETECTOR",
        "PTZ_TRACKING_MODE",
        "PTZ_SUBJECT",
        "PTZ_ACTUATOR",
        "PTZ_CAMERA_ADDR",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "scheduler": { "target_fps": 10, "detection_timeout_ms": 400 },
            "tracking": { "lock_frames": 8, "loss_timeout_ms": 1500 },
            "controller": { "deadzone_radius": 0.08, "gain": 0.7, "target_size": 0.3 },
            "dispatcher": { "min_interval_ms": 250 },
            "detector": { "backend": "blob", "mode": "hybrid", "subject": "Person" },
            "actuator": { "kind": "log", "pulse_ms": 150 }
        }"#,
    );

    std::env::set_var("PTZ_TRACKER_CONFIG", file.path());
    std::env::set_var("PTZ_DEADZONE", "0.12");
    std::env::set_var("PTZ_MIN_INTERVAL_MS", "400");
    std::env::set_var("PTZ_CAMERA_ADDR", "192.168.1.40");

    let cfg = TrackerConfig::load().expect("load config");

    assert_eq!(cfg.scheduler.target_fps, 10.0);
    assert_eq!(cfg.scheduler.detection_timeout, Duration::from_millis(400));
    assert_eq!(cfg.tracking.lock_frames, 8);
    assert_eq!(cfg.tracking.loss_timeout, Duration::from_millis(1500));
    assert_eq!(cfg.controller.gain, 0.7);
    assert_eq!(cfg.controller.target_size, Some(0.3));
    assert_eq!(cfg.controller.deadzone_x, 0.12);
    assert_eq!(cfg.controller.deadzone_y, 0.12);
    assert_eq!(cfg.dispatcher.min_interval, Duration::from_millis(400));
    assert_eq!(cfg.detector.backend.as_deref(), Some("blob"));
    assert_eq!(cfg.detector.mode, TrackingMode::Hybrid);
    assert_eq!(cfg.detector.subject_label.as_deref(), Some("person"));
    assert_eq!(cfg.actuator.kind, "log");
    assert_eq!(cfg.actuator.address.as_deref(), Some("192.168.1.40"));
    assert_eq!(cfg.actuator.pulse, Duration::from_millis(150));

    clear_env();
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = TrackerConfig::load().expect("defaults load");
    let defaults = TrackerConfig::default();
    assert_eq!(cfg.scheduler.target_fps, defaults.scheduler.target_fps);
    assert_eq!(cfg.dispatcher.min_interval, defaults.dispatcher.min_interval);
    assert_eq!(cfg.detector.mode, TrackingMode::DetectionOnly);
    assert_eq!(cfg.actuator.kind, "log");
}

#[test]
fn explicit_path_wins_over_env_var() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let from_env = write_config(r#"{ "scheduler": { "target_fps": 5 } }"#);
    let explicit = write_config(r#"{ "scheduler": { "target_fps": 20 } }"#);
    std::env::set_var("PTZ_TRACKER_CONFIG", from_env.path());

    let cfg = TrackerConfig::load_from(Some(explicit.path())).expect("load explicit");
    assert_eq!(cfg.scheduler.target_fps, 20.0);

    clear_env();
}

#[test]
fn rejects_deadzone_outside_unit_range() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{ "controller": { "deadzone_radius": 1.5 } }"#);
    std::env::set_var("PTZ_TRACKER_CONFIG", file.path());
    let err = TrackerConfig::load().expect_err("deadzone must be rejected");
    assert!(err.to_string().contains("deadzone"), "{err}");

    clear_env();
}

#[test]
fn profile_sets_the_base_that_file_and_env_override() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "profile": "smooth",
            "controller": { "deadzone_y": 0.03 }
        }"#,
    );
    std::env::set_var("PTZ_TRACKER_CONFIG", file.path());
    std::env::set_var("PTZ_DEADZONE_X", "0.2");

    let cfg = TrackerConfig::load().expect("load profile");
    let smooth = TrackerConfig::with_profile(OperationProfile::Smooth);
    assert_eq!(cfg.scheduler.target_fps, smooth.scheduler.target_fps);
    assert_eq!(cfg.controller.max_step, smooth.controller.max_step);
    assert_eq!(cfg.controller.deadzone_x, 0.2);
    assert_eq!(cfg.controller.deadzone_y, 0.03);

    // The env var picks the profile over the file key.
    std::env::set_var("PTZ_PROFILE", "fast");
    let cfg = TrackerConfig::load().expect("load env profile");
    let fast = TrackerConfig::with_profile(OperationProfile::Fast);
    assert_eq!(cfg.scheduler.target_fps, fast.scheduler.target_fps);
    assert_eq!(cfg.controller.max_step, fast.controller.max_step);
    assert_eq!(cfg.controller.deadzone_y, 0.03);

    clear_env();
}

#[test]
fn per_axis_deadzones_override_the_shared_radius() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{ "controller": { "deadzone_radius": 0.1, "deadzone_x": 0.04 } }"#,
    );
    std::env::set_var("PTZ_TRACKER_CONFIG", file.path());

    let cfg = TrackerConfig::load().expect("load deadzones");
    assert_eq!(cfg.controller.deadzone_x, 0.04);
    assert_eq!(cfg.controller.deadzone_y, 0.1);

    std::env::set_var("PTZ_DEADZONE_Y", "1.0");
    let err = TrackerConfig::load().expect_err("tilt deadzone must be rejected");
    assert!(err.to_string().contains("deadzone_y"), "{err}");

    clear_env();
}

#[test]
fn rejects_unknown_profile() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PTZ_PROFILE", "cinematic");
    let err = TrackerConfig::load().expect_err("profile must be rejected");
    assert!(err.to_string().contains("cinematic"), "{err}");

    clear_env();
}

#[test]
fn rejects_unknown_tracking_mode_and_bad_numbers() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PTZ_TRACKING_MODE", "kalman");
    assert!(TrackerConfig::load().is_err());
    clear_env();

    std::env::set_var("PTZ_TARGET_FPS", "fast");
    assert!(TrackerConfig::load().is_err());
    clear_env();

    std::env::set_var("PTZ_TARGET_FPS", "0");
    assert!(TrackerConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_malformed_json() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config("{ not json");
    std::env::set_var("PTZ_TRACKER_CONFIG", file.path());
    assert!(TrackerConfig::load().is_err());

    clear_env();
}
