//! Tracker configuration.
//!
//! Resolution order: built-in defaults, then the operation profile (`PTZ_PROFILE`, else the
//! file's `profile` key), then the JSON file named by `PTZ_TRACKER_CONFIG`, then `PTZ_*`
//! environment overrides. The result is validated before anything starts;
//! invalid tunables are an error, never clamped.
//!
//! The defaults are calibration starting points for a ~15 fps detector and a PTZOptics-class
//! head. Re-tune them against the real camera and detector latency.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use crate::detect::TrackingMode;
use crate::error::ConfigError;

const DEFAULT_TARGET_FPS: f32 = 15.0;
const DEFAULT_DETECTION_TIMEOUT_MS: u64 = 500;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;
const DEFAULT_LOCK_FRAMES: u32 = 5;
const DEFAULT_LOSS_TIMEOUT_MS: u64 = 1000;
const DEFAULT_LOST_GRACE_MS: u64 = 2000;
const DEFAULT_UNAVAILABLE_LIMIT: u32 = 3;
const DEFAULT_DEADZONE: f32 = 0.05;
const DEFAULT_GAIN: f32 = 1.0;
const DEFAULT_MAX_STEP: f32 = 0.2;
const DEFAULT_SMOOTHING: f32 = 0.6;
const DEFAULT_ZOOM_DEADZONE: f32 = 0.1;
const DEFAULT_ZOOM_GAIN: f32 = 0.5;
const DEFAULT_MAX_ZOOM_STEP: f32 = 0.1;
const DEFAULT_ZOOM_SMOOTHING: f32 = 0.5;
const DEFAULT_NUDGE_STEP: f32 = 0.1;
const DEFAULT_MIN_INTERVAL_MS: u64 = 300;
const DEFAULT_FPS_WINDOW: usize = 30;
const DEFAULT_ACTUATOR: &str = "log";
const DEFAULT_PULSE_MS: u64 = 200;

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    profile: Option<String>,
    scheduler: Option<SchedulerConfigFile>,
    tracking: Option<TrackingConfigFile>,
    controller: Option<ControllerConfigFile>,
    dispatcher: Option<DispatcherConfigFile>,
    telemetry: Option<TelemetryConfigFile>,
    detector: Option<DetectorConfigFile>,
    actuator: Option<ActuatorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SchedulerConfigFile {
    target_fps: Option<f32>,
    detection_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    min_confidence: Option<f32>,
    lock_frames: Option<u32>,
    loss_timeout_ms: Option<u64>,
    lost_grace_ms: Option<u64>,
    unavailable_limit: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ControllerConfigFile {
    target_x: Option<f32>,
    target_y: Option<f32>,
    /// Sets both axes; `deadzone_x` / `deadzone_y` win over it.
    deadzone_radius: Option<f32>,
    deadzone_x: Option<f32>,
    deadzone_y: Option<f32>,
    gain: Option<f32>,
    max_step: Option<f32>,
    smoothing: Option<f32>,
    target_size: Option<f32>,
    zoom_deadzone: Option<f32>,
    zoom_gain: Option<f32>,
    max_zoom_step: Option<f32>,
    zoom_smoothing: Option<f32>,
    nudge_step: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct DispatcherConfigFile {
    min_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TelemetryConfigFile {
    fps_window: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    mode: Option<String>,
    subject: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ActuatorConfigFile {
    kind: Option<String>,
    address: Option<String>,
    pulse_ms: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct TrackerConfig {
    pub scheduler: SchedulerSettings,
    pub tracking: TrackingSettings,
    pub controller: ControllerSettings,
    pub dispatcher: DispatcherSettings,
    pub telemetry: TelemetrySettings,
    pub detector: DetectorSettings,
    pub actuator: ActuatorSettings,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Sampling cadence; also the expected detection rate used to size the loss threshold.
    pub target_fps: f32,
    /// A request pending longer than this is treated as a miss.
    pub detection_timeout: Duration,
}

impl SchedulerSettings {
    /// Time between samples, computed in f64 so whole-millisecond cadences stay exact.
    pub fn sample_interval(&self) -> Result<Duration, ConfigError> {
        let interval = Duration::try_from_secs_f64(1.0 / f64::from(self.target_fps))
            .map_err(|_| ConfigError::SampleRate(self.target_fps))?;
        if interval.is_zero() {
            return Err(ConfigError::SampleRate(self.target_fps));
        }
        Ok(interval)
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            target_fps: DEFAULT_TARGET_FPS,
            detection_timeout: Duration::from_millis(DEFAULT_DETECTION_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackingSettings {
    /// Detections below this confidence count as no detection.
    pub min_confidence: f32,
    /// Consecutive in-deadzone detections needed before declaring a lock.
    pub lock_frames: u32,
    /// Consecutive misses spanning this long move an active track to `Lost`.
    pub loss_timeout: Duration,
    /// Time spent in `Lost` before searching the whole frame again.
    pub lost_grace: Duration,
    /// Consecutive `Unavailable` failures that force tracking off.
    pub unavailable_limit: u32,
}

impl TrackingSettings {
    /// Loss threshold in frames at the given detection rate (at least one frame).
    pub fn loss_threshold_frames(&self, expected_fps: f32) -> u32 {
        // 0.2 s at 15 fps is 3 frames, not 3.0000000000000004 rounded up.
        let frames = (self.loss_timeout.as_secs_f64() * f64::from(expected_fps) - 1e-6).ceil();
        (frames as u32).max(1)
    }
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            lock_frames: DEFAULT_LOCK_FRAMES,
            loss_timeout: Duration::from_millis(DEFAULT_LOSS_TIMEOUT_MS),
            lost_grace: Duration::from_millis(DEFAULT_LOST_GRACE_MS),
            unavailable_limit: DEFAULT_UNAVAILABLE_LIMIT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub target_x: f32,
    pub target_y: f32,
    /// Half-width of the pan deadzone band around `target_x`.
    pub deadzone_x: f32,
    /// Half-height of the tilt deadzone band around `target_y`.
    pub deadzone_y: f32,
    /// Proportional gain applied to the offset beyond the deadzone.
    pub gain: f32,
    /// Upper bound on |pan| and |tilt| per command.
    pub max_step: f32,
    /// Smoothing factor α for pan/tilt; 1.0 disables smoothing.
    pub smoothing: f32,
    /// Desired subject size (larger box side). Zoom control is off when unset.
    pub target_size: Option<f32>,
    pub zoom_deadzone: f32,
    pub zoom_gain: f32,
    pub max_zoom_step: f32,
    pub zoom_smoothing: f32,
    /// Magnitude of a manual fine-tune nudge on each moving axis.
    pub nudge_step: f32,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            target_x: 0.5,
            target_y: 0.5,
            deadzone_x: DEFAULT_DEADZONE,
            deadzone_y: DEFAULT_DEADZONE,
            gain: DEFAULT_GAIN,
            max_step: DEFAULT_MAX_STEP,
            smoothing: DEFAULT_SMOOTHING,
            target_size: None,
            zoom_deadzone: DEFAULT_ZOOM_DEADZONE,
            zoom_gain: DEFAULT_ZOOM_GAIN,
            max_zoom_step: DEFAULT_MAX_ZOOM_STEP,
            zoom_smoothing: DEFAULT_ZOOM_SMOOTHING,
            nudge_step: DEFAULT_NUDGE_STEP,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub min_interval: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(DEFAULT_MIN_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    /// Number of recent completions the fps average spans.
    pub fps_window: usize,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            fps_window: DEFAULT_FPS_WINDOW,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// Registered backend name; the registry default when unset.
    pub backend: Option<String>,
    pub mode: TrackingMode,
    /// Only boxes with this label are considered.
    pub subject_label: Option<String>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: None,
            mode: TrackingMode::DetectionOnly,
            subject_label: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActuatorSettings {
    /// `log` (no hardware, the default), `simulated` (in-process head), or `ptzoptics`
    /// (PTZOptics CGI over HTTP, needs the `actuator-http` feature).
    pub kind: String,
    /// Camera host[:port] for network actuators.
    pub address: Option<String>,
    /// How long a velocity-based head moves per step before it is stopped.
    pub pulse: Duration,
}

impl Default for ActuatorSettings {
    fn default() -> Self {
        Self {
            kind: DEFAULT_ACTUATOR.to_string(),
            address: None,
            pulse: Duration::from_millis(DEFAULT_PULSE_MS),
        }
    }
}

/// Named tuning presets: detection rate, pan/tilt speed and deadzone width together.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationProfile {
    /// Slow, wide-deadzone motion for broadcast.
    Smooth,
    /// Tight centering for presentations.
    Precise,
    /// The built-in defaults.
    Balanced,
    /// Quick response for sports and action.
    Fast,
    /// Fewest detector calls and head moves.
    Minimal,
}

impl OperationProfile {
    pub const ALL: [OperationProfile; 5] = [
        OperationProfile::Smooth,
        OperationProfile::Precise,
        OperationProfile::Balanced,
        OperationProfile::Fast,
        OperationProfile::Minimal,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "smooth" => Some(Self::Smooth),
            "precise" => Some(Self::Precise),
            "balanced" => Some(Self::Balanced),
            "fast" => Some(Self::Fast),
            "minimal" => Some(Self::Minimal),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Smooth => "smooth",
            Self::Precise => "precise",
            Self::Balanced => "balanced",
            Self::Fast => "fast",
            Self::Minimal => "minimal",
        }
    }

    /// `(target_fps, max_step, deadzone_x, deadzone_y)`.
    fn tunables(self) -> (f32, f32, f32, f32) {
        match self {
            Self::Smooth => (7.5, 0.12, 0.12, 0.12),
            Self::Precise => (22.5, 0.24, 0.02, 0.02),
            Self::Balanced => (
                DEFAULT_TARGET_FPS,
                DEFAULT_MAX_STEP,
                DEFAULT_DEADZONE,
                DEFAULT_DEADZONE,
            ),
            Self::Fast => (30.0, 0.32, 0.08, 0.08),
            Self::Minimal => (4.5, 0.16, 0.15, 0.15),
        }
    }

    /// Overwrite the tunables this profile owns; everything else is left alone.
    pub fn apply(self, cfg: &mut TrackerConfig) {
        let (fps, max_step, deadzone_x, deadzone_y) = self.tunables();
        cfg.scheduler.target_fps = fps;
        cfg.controller.max_step = max_step;
        cfg.controller.deadzone_x = deadzone_x;
        cfg.controller.deadzone_y = deadzone_y;
    }
}

impl TrackerConfig {
    /// Defaults with `profile` applied.
    pub fn with_profile(profile: OperationProfile) -> Self {
        let mut cfg = Self::default();
        profile.apply(&mut cfg);
        cfg
    }

    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PTZ_TRACKER_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with an explicit config file instead of `PTZ_TRACKER_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => TrackerConfigFile::default(),
        };
        let profile = match env_nonempty("PTZ_PROFILE").or_else(|| file_cfg.profile.clone()) {
            Some(name) => Some(parse_profile(&name)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg, profile)?;
        cfg.apply_env()?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TrackerConfigFile, profile: Option<OperationProfile>) -> Result<Self> {
        let defaults = match profile {
            Some(profile) => {
                log::info!("config: operation profile {}", profile.name());
                Self::with_profile(profile)
            }
            None => Self::default(),
        };

        let scheduler = file.scheduler.unwrap_or_default();
        let scheduler = SchedulerSettings {
            target_fps: scheduler
                .target_fps
                .unwrap_or(defaults.scheduler.target_fps),
            detection_timeout: scheduler
                .detection_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.scheduler.detection_timeout),
        };

        let tracking = file.tracking.unwrap_or_default();
        let tracking = TrackingSettings {
            min_confidence: tracking
                .min_confidence
                .unwrap_or(defaults.tracking.min_confidence),
            lock_frames: tracking
                .lock_frames
                .unwrap_or(defaults.tracking.lock_frames),
            loss_timeout: tracking
                .loss_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.tracking.loss_timeout),
            lost_grace: tracking
                .lost_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.tracking.lost_grace),
            unavailable_limit: tracking
                .unavailable_limit
                .unwrap_or(defaults.tracking.unavailable_limit),
        };

        let c = file.controller.unwrap_or_default();
        let d = defaults.controller;
        let controller = ControllerSettings {
            target_x: c.target_x.unwrap_or(d.target_x),
            target_y: c.target_y.unwrap_or(d.target_y),
            deadzone_x: c.deadzone_x.or(c.deadzone_radius).unwrap_or(d.deadzone_x),
            deadzone_y: c.deadzone_y.or(c.deadzone_radius).unwrap_or(d.deadzone_y),
            gain: c.gain.unwrap_or(d.gain),
            max_step: c.max_step.unwrap_or(d.max_step),
            smoothing: c.smoothing.unwrap_or(d.smoothing),
            target_size: c.target_size.or(d.target_size),
            zoom_deadzone: c.zoom_deadzone.unwrap_or(d.zoom_deadzone),
            zoom_gain: c.zoom_gain.unwrap_or(d.zoom_gain),
            max_zoom_step: c.max_zoom_step.unwrap_or(d.max_zoom_step),
            zoom_smoothing: c.zoom_smoothing.unwrap_or(d.zoom_smoothing),
            nudge_step: c.nudge_step.unwrap_or(d.nudge_step),
        };

        let dispatcher = DispatcherSettings {
            min_interval: file
                .dispatcher
                .and_then(|dispatcher| dispatcher.min_interval_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.dispatcher.min_interval),
        };

        let telemetry = TelemetrySettings {
            fps_window: file
                .telemetry
                .and_then(|telemetry| telemetry.fps_window)
                .unwrap_or(defaults.telemetry.fps_window),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file.backend,
            mode: match detector_file.mode {
                Some(mode) => parse_mode(&mode)?,
                None => defaults.detector.mode,
            },
            subject_label: detector_file.subject,
        };

        let actuator_file = file.actuator.unwrap_or_default();
        let actuator = ActuatorSettings {
            kind: actuator_file.kind.unwrap_or(defaults.actuator.kind),
            address: actuator_file.address,
            pulse: actuator_file
                .pulse_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.actuator.pulse),
        };

        Ok(Self {
            scheduler,
            tracking,
            controller,
            dispatcher,
            telemetry,
            detector,
            actuator,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(fps) = env_parse::<f32>("PTZ_TARGET_FPS")? {
            self.scheduler.target_fps = fps;
        }
        if let Some(radius) = env_parse::<f32>("PTZ_DEADZONE")? {
            self.controller.deadzone_x = radius;
            self.controller.deadzone_y = radius;
        }
        if let Some(half_width) = env_parse::<f32>("PTZ_DEADZONE_X")? {
            self.controller.deadzone_x = half_width;
        }
        if let Some(half_height) = env_parse::<f32>("PTZ_DEADZONE_Y")? {
            self.controller.deadzone_y = half_height;
        }
        if let Some(confidence) = env_parse::<f32>("PTZ_MIN_CONFIDENCE")? {
            self.tracking.min_confidence = confidence;
        }
        if let Some(ms) = env_parse::<u64>("PTZ_MIN_INTERVAL_MS")? {
            self.dispatcher.min_interval = Duration::from_millis(ms);
        }
        if let Some(backend) = env_nonempty("PTZ_DETECTOR") {
            self.detector.backend = Some(backend);
        }
        if let Some(mode) = env_nonempty("PTZ_TRACKING_MODE") {
            self.detector.mode = parse_mode(&mode)?;
        }
        if let Some(subject) = env_nonempty("PTZ_SUBJECT") {
            self.detector.subject_label = Some(subject);
        }
        if let Some(kind) = env_nonempty("PTZ_ACTUATOR") {
            self.actuator.kind = kind;
        }
        if let Some(addr) = env_nonempty("PTZ_CAMERA_ADDR") {
            self.actuator.address = Some(addr);
        }
        Ok(())
    }

    fn normalize(&mut self) {
        if let Some(label) = self.detector.subject_label.as_mut() {
            *label = label.trim().to_lowercase();
        }
        self.actuator.kind = self.actuator.kind.trim().to_lowercase();
    }

    /// Reject configurations the control loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.controller;
        deadzone("controller.deadzone_x", c.deadzone_x)?;
        deadzone("controller.deadzone_y", c.deadzone_y)?;
        deadzone("controller.zoom_deadzone", c.zoom_deadzone)?;
        positive("scheduler.target_fps", self.scheduler.target_fps)?;
        self.scheduler.sample_interval()?;
        positive_duration(
            "scheduler.detection_timeout",
            self.scheduler.detection_timeout,
        )?;
        positive_duration("dispatcher.min_interval", self.dispatcher.min_interval)?;
        positive_duration("tracking.loss_timeout", self.tracking.loss_timeout)?;
        if self.tracking.lock_frames == 0 {
            return Err(ConfigError::NonPositive {
                name: "tracking.lock_frames",
            });
        }
        if self.tracking.unavailable_limit == 0 {
            return Err(ConfigError::NonPositive {
                name: "tracking.unavailable_limit",
            });
        }
        if self.telemetry.fps_window == 0 {
            return Err(ConfigError::NonPositive {
                name: "telemetry.fps_window",
            });
        }
        positive("controller.gain", c.gain)?;
        positive("controller.zoom_gain", c.zoom_gain)?;

        unit_range("tracking.min_confidence", self.tracking.min_confidence)?;
        unit_range("controller.target_x", c.target_x)?;
        unit_range("controller.target_y", c.target_y)?;
        unit_range("controller.max_step", c.max_step)?;
        unit_range("controller.max_zoom_step", c.max_zoom_step)?;
        unit_range("controller.nudge_step", c.nudge_step)?;
        positive("controller.max_step", c.max_step)?;
        positive("controller.max_zoom_step", c.max_zoom_step)?;
        if let Some(size) = c.target_size {
            unit_range("controller.target_size", size)?;
            positive("controller.target_size", size)?;
        }
        smoothing("controller.smoothing", c.smoothing)?;
        smoothing("controller.zoom_smoothing", c.zoom_smoothing)?;

        if let Some(label) = &self.detector.subject_label {
            validate_subject_label(label)?;
        }
        Ok(())
    }
}

/// Subject labels are lowercase category tags such as `person` or `sports ball`.
pub fn validate_subject_label(label: &str) -> Result<(), ConfigError> {
    static LABEL_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = LABEL_RE.get_or_init(|| {
        regex::Regex::new(r"^[a-z][a-z0-9 _-]{0,31}$").expect("static label regex")
    });
    if !re.is_match(label) {
        return Err(ConfigError::SubjectLabel(label.to_string()));
    }
    Ok(())
}

fn parse_mode(value: &str) -> Result<TrackingMode, ConfigError> {
    TrackingMode::parse(value).ok_or_else(|| ConfigError::TrackingMode(value.to_string()))
}

fn parse_profile(value: &str) -> Result<OperationProfile, ConfigError> {
    OperationProfile::parse(value).ok_or_else(|| ConfigError::Profile(value.to_string()))
}

fn deadzone(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Deadzone { name, value })
    }
}

fn positive(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { name })
    }
}

fn positive_duration(name: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        Err(ConfigError::NonPositive { name })
    } else {
        Ok(())
    }
}

fn unit_range(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfUnitRange { name, value })
    }
}

fn smoothing(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::SmoothingFactor { name, value })
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_nonempty(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value '{}'", key, raw)),
        None => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<TrackerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
