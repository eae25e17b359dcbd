//! Motion commands and the manual nudge directions.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CommandOrigin {
    /// Produced by the motion controller from a detection.
    Automatic,
    /// Fine-tune nudge or home request from the operator.
    Manual,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum MotionAction {
    /// Relative step per axis in [-1, 1]. `pan > 0` right, `tilt > 0` up, `zoom > 0` in.
    Step { pan: f32, tilt: f32, zoom: f32 },
    /// Return to the head's home position.
    Home,
}

/// One command for the actuator. Consumed exactly once by the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MotionCommand {
    pub sequence: u64,
    pub origin: CommandOrigin,
    pub action: MotionAction,
}

impl MotionCommand {
    pub fn step(sequence: u64, origin: CommandOrigin, pan: f32, tilt: f32, zoom: f32) -> Self {
        Self {
            sequence,
            origin,
            action: MotionAction::Step { pan, tilt, zoom },
        }
    }

    pub fn home(sequence: u64) -> Self {
        Self {
            sequence,
            origin: CommandOrigin::Manual,
            action: MotionAction::Home,
        }
    }

    /// Largest absolute pan/tilt component (0 for non-step actions).
    pub fn pan_tilt_magnitude(&self) -> f32 {
        match self.action {
            MotionAction::Step { pan, tilt, .. } => pan.abs().max(tilt.abs()),
            MotionAction::Home => 0.0,
        }
    }
}

impl fmt::Display for MotionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            MotionAction::Step { pan, tilt, zoom } => write!(
                f,
                "#{} {:?} pan={:+.3} tilt={:+.3} zoom={:+.3}",
                self.sequence, self.origin, pan, tilt, zoom
            ),
            MotionAction::Home => write!(f, "#{} {:?} home", self.sequence, self.origin),
        }
    }
}

/// Shared, monotonically increasing command sequence.
///
/// The controller and the manual nudge path draw from the same counter so the dispatcher
/// can order everything it receives.
#[derive(Clone, Debug, Default)]
pub struct SequenceCounter(Arc<AtomicU64>);

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence number, starting at 1.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Manual fine-tune direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PtzDirection {
    Up,
    Down,
    Left,
    Right,
    UpLeft,
    UpRight,
    DownLeft,
    DownRight,
}

impl PtzDirection {
    pub const ALL: [PtzDirection; 8] = [
        PtzDirection::Up,
        PtzDirection::Down,
        PtzDirection::Left,
        PtzDirection::Right,
        PtzDirection::UpLeft,
        PtzDirection::UpRight,
        PtzDirection::DownLeft,
        PtzDirection::DownRight,
    ];

    /// Unit (pan, tilt) signs for this direction.
    pub fn axes(self) -> (f32, f32) {
        match self {
            PtzDirection::Up => (0.0, 1.0),
            PtzDirection::Down => (0.0, -1.0),
            PtzDirection::Left => (-1.0, 0.0),
            PtzDirection::Right => (1.0, 0.0),
            PtzDirection::UpLeft => (-1.0, 1.0),
            PtzDirection::UpRight => (1.0, 1.0),
            PtzDirection::DownLeft => (-1.0, -1.0),
            PtzDirection::DownRight => (1.0, -1.0),
        }
    }

    /// Fixed-magnitude manual step in this direction.
    pub fn nudge(self, sequence: u64, step: f32) -> MotionCommand {
        let (pan, tilt) = self.axes();
        MotionCommand::step(sequence, CommandOrigin::Manual, pan * step, tilt * step, 0.0)
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect();
        match normalized.as_str() {
            "up" => Some(PtzDirection::Up),
            "down" => Some(PtzDirection::Down),
            "left" => Some(PtzDirection::Left),
            "right" => Some(PtzDirection::Right),
            "upleft" => Some(PtzDirection::UpLeft),
            "upright" => Some(PtzDirection::UpRight),
            "downleft" => Some(PtzDirection::DownLeft),
            "downright" => Some(PtzDirection::DownRight),
            _ => None,
        }
    }
}
