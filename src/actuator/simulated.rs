use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::actuator::Actuator;
use crate::command::{MotionAction, MotionCommand};
use crate::error::ActuatorError;

const MIN_ZOOM: f32 = 1.0;
const MAX_ZOOM: f32 = 8.0;

/// Where the simulated head points. Pan/tilt are in field-of-view widths at 1x zoom.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct HeadPosition {
    pub pan: f32,
    pub tilt: f32,
    pub zoom: f32,
}

impl Default for HeadPosition {
    fn default() -> Self {
        Self {
            pan: 0.0,
            tilt: 0.0,
            zoom: MIN_ZOOM,
        }
    }
}

/// A record of one `send` call.
#[derive(Clone, Copy, Debug)]
pub struct SentCommand {
    pub command: MotionCommand,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Default)]
struct HeadState {
    position: HeadPosition,
    history: Vec<SentCommand>,
    failures: VecDeque<ActuatorError>,
}

/// In-process PTZ head for the demo scene and tests.
///
/// Clones share the same head, so a test can keep one while the dispatcher owns another.
/// A step moves the view by `step / zoom` field widths.
#[derive(Clone, Default)]
pub struct SimulatedHead {
    state: Arc<Mutex<HeadState>>,
    unreachable: Arc<AtomicBool>,
    latency: Duration,
}

impl SimulatedHead {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each `send` blocks this long, like a real pulse.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn position(&self) -> HeadPosition {
        self.lock().position
    }

    pub fn history(&self) -> Vec<SentCommand> {
        self.lock().history.clone()
    }

    pub fn commands_sent(&self) -> usize {
        self.lock().history.len()
    }

    /// Fail the next `send` with `error`.
    pub fn fail_next(&self, error: ActuatorError) {
        self.lock().failures.push_back(error);
    }

    /// While unreachable, every `send` and `reconnect` fails.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, HeadState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Actuator for SimulatedHead {
    fn name(&self) -> &str {
        "simulated"
    }

    fn send(&mut self, command: &MotionCommand) -> Result<(), ActuatorError> {
        let started = Instant::now();
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ActuatorError::Unreachable("simulated head offline".into()));
        }

        let mut state = self.lock();
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        let position = &mut state.position;
        match command.action {
            MotionAction::Step { pan, tilt, zoom } => {
                position.pan += pan / position.zoom;
                position.tilt += tilt / position.zoom;
                position.zoom = (position.zoom * (1.0 + zoom)).clamp(MIN_ZOOM, MAX_ZOOM);
            }
            MotionAction::Home => *position = HeadPosition::default(),
        }
        state.history.push(SentCommand {
            command: *command,
            started,
            finished: Instant::now(),
        });
        Ok(())
    }

    fn reconnect(&mut self) -> Result<(), ActuatorError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(ActuatorError::Unreachable("simulated head offline".into()))
        } else {
            Ok(())
        }
    }
}
