//! Error taxonomy for the tracking core.
//!
//! Detector failures are transient and folded into miss handling by the state machine.
//! Actuator failures are surfaced and never retried. Configuration errors are fatal at startup.

use thiserror::Error;

/// Failure kinds a detector call can end with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The call did not finish within the detection timeout.
    Timeout,
    /// The detector (model or remote service) cannot be reached at all.
    Unavailable,
    /// The detector ran but produced an error.
    Error,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DetectorFailure {
    #[error("detector timed out")]
    Timeout,
    #[error("detector unavailable: {0}")]
    Unavailable(String),
    #[error("detector error: {0}")]
    Error(String),
}

impl DetectorFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            DetectorFailure::Timeout => FailureKind::Timeout,
            DetectorFailure::Unavailable(_) => FailureKind::Unavailable,
            DetectorFailure::Error(_) => FailureKind::Error,
        }
    }
}

/// Command-level actuator failures.
///
/// A failed command leaves the head in an unknown position, so these always reach the UI.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ActuatorError {
    #[error("actuator unreachable: {0}")]
    Unreachable(String),
    #[error("actuator rejected command: {0}")]
    Rejected(String),
}

/// Invalid tunables. Never clamped; the control loop refuses to start.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("deadzone {name} must be in [0, 1), got {value}")]
    Deadzone { name: &'static str, value: f32 },
    #[error("{name} must be greater than zero")]
    NonPositive { name: &'static str },
    #[error("target fps {0} has no representable sampling interval")]
    SampleRate(f32),
    #[error("{name} must be within [0, 1], got {value}")]
    OutOfUnitRange { name: &'static str, value: f32 },
    #[error("smoothing factor {name} must be in (0, 1], got {value}")]
    SmoothingFactor { name: &'static str, value: f32 },
    #[error("invalid subject label '{0}'")]
    SubjectLabel(String),
    #[error("unknown tracking mode '{0}' (expected detection-only or hybrid)")]
    TrackingMode(String),
    #[error("unknown operation profile '{0}' (expected smooth, precise, balanced, fast or minimal)")]
    Profile(String),
}
