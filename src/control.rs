//! Deadzone & motion controller.
//!
//! Turns the accepted subject box into a relative pan/tilt/zoom step:
//!
//! 1. Offsets of the box center from the target point. Inside the deadzone on both axes
//!    means no pan/tilt correction (`in_deadzone`).
//! 2. Proportional step on the part of the offset beyond the deadzone, clamped to `max_step`.
//!    There is no integral or derivative term; detector latency already adds phase lag.
//! 3. Exponential smoothing across consecutive commands. Each filter seeds from its first
//!    sample and resets on deadzone entry, so a fresh correction is never attenuated.
//!
//! Zoom follows the same recipe on the size error, with its own deadzone and filter, and
//! never feeds back into the pan/tilt offsets.

use crate::command::{CommandOrigin, MotionCommand, SequenceCounter};
use crate::config::ControllerSettings;
use crate::detect::DetectionBox;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionDecision {
    /// Subject center within the pan/tilt deadzone.
    pub in_deadzone: bool,
    /// `None` when no axis needs correcting.
    pub command: Option<MotionCommand>,
}

/// Exponential moving average, `new = α·raw + (1−α)·prev`.
#[derive(Clone, Debug)]
struct Smoother {
    alpha: f32,
    value: Option<f32>,
}

impl Smoother {
    fn new(alpha: f32) -> Self {
        Self { alpha, value: None }
    }

    fn apply(&mut self, raw: f32) -> f32 {
        let next = match self.value {
            Some(prev) => self.alpha * raw + (1.0 - self.alpha) * prev,
            None => raw,
        };
        self.value = Some(next);
        next
    }

    fn reset(&mut self) {
        self.value = None;
    }
}

/// Proportional step beyond the deadzone boundary, clamped to `max`. Zero inside the band.
fn proportional_step(offset: f32, deadzone: f32, gain: f32, max: f32) -> f32 {
    let excess = offset.abs() - deadzone;
    if excess <= 0.0 {
        return 0.0;
    }
    (gain * excess).min(max).copysign(offset)
}

pub struct MotionController {
    settings: ControllerSettings,
    sequence: SequenceCounter,
    pan: Smoother,
    tilt: Smoother,
    zoom: Smoother,
}

impl MotionController {
    pub fn new(settings: ControllerSettings, sequence: SequenceCounter) -> Self {
        Self {
            pan: Smoother::new(settings.smoothing),
            tilt: Smoother::new(settings.smoothing),
            zoom: Smoother::new(settings.zoom_smoothing),
            settings,
            sequence,
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Whether `subject` sits inside the pan/tilt deadzone. Pure; no filter update.
    pub fn in_deadzone(&self, subject: &DetectionBox) -> bool {
        let s = &self.settings;
        (subject.x - s.target_x).abs() <= s.deadzone_x
            && (subject.y - s.target_y).abs() <= s.deadzone_y
    }

    /// Evaluate one accepted detection and produce at most one command.
    pub fn evaluate(&mut self, subject: &DetectionBox) -> MotionDecision {
        let s = &self.settings;
        let in_deadzone = self.in_deadzone(subject);

        let (pan, tilt) = if in_deadzone {
            self.pan.reset();
            self.tilt.reset();
            (0.0, 0.0)
        } else {
            let raw_pan = proportional_step(
                subject.x - s.target_x,
                s.deadzone_x,
                s.gain,
                s.max_step,
            );
            // Image y grows downward; positive tilt is up.
            let raw_tilt = -proportional_step(
                subject.y - s.target_y,
                s.deadzone_y,
                s.gain,
                s.max_step,
            );
            (
                self.pan.apply(raw_pan).clamp(-s.max_step, s.max_step),
                self.tilt.apply(raw_tilt).clamp(-s.max_step, s.max_step),
            )
        };

        let zoom = match s.target_size {
            Some(target_size) => {
                let error = 1.0 - subject.size() / target_size;
                let raw = proportional_step(error, s.zoom_deadzone, s.zoom_gain, s.max_zoom_step);
                if raw == 0.0 {
                    self.zoom.reset();
                    0.0
                } else {
                    self.zoom
                        .apply(raw)
                        .clamp(-s.max_zoom_step, s.max_zoom_step)
                }
            }
            None => 0.0,
        };

        let command = if pan != 0.0 || tilt != 0.0 || zoom != 0.0 {
            Some(MotionCommand::step(
                self.sequence.next(),
                CommandOrigin::Automatic,
                pan,
                tilt,
                zoom,
            ))
        } else {
            None
        };

        MotionDecision {
            in_deadzone,
            command,
        }
    }

    /// Forget filter history (tracking disabled, subject lost).
    pub fn reset(&mut self) {
        self.pan.reset();
        self.tilt.reset();
        self.zoom.reset();
    }
}
