//! PTZOptics HTTP-CGI control.
//!
//! The head only understands directional moves at a speed, so a relative step becomes a
//! pulse: start moving at a speed proportional to the step, hold, then `ptzstop`.

use std::time::Duration;

use crate::command::{MotionAction, MotionCommand};

pub const MAX_PAN_SPEED: u8 = 24;
pub const MAX_TILT_SPEED: u8 = 20;
pub const MAX_ZOOM_SPEED: u8 = 7;

pub const STOP: &str = "ptzcmd&ptzstop";
pub const HOME: &str = "ptzcmd&home";

/// Query strings for one command, in the order they must be issued.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PulsePlan {
    pub start: Vec<String>,
    /// How long to let the head move before stopping it.
    pub hold: Duration,
    pub stop: Option<&'static str>,
}

#[derive(Clone, Debug)]
pub struct PtzOpticsEncoder {
    pulse: Duration,
}

impl PtzOpticsEncoder {
    pub fn new(pulse: Duration) -> Self {
        Self { pulse }
    }

    pub fn encode(&self, command: &MotionCommand) -> PulsePlan {
        let (pan, tilt, zoom) = match command.action {
            MotionAction::Home => {
                return PulsePlan {
                    start: vec![HOME.to_string()],
                    hold: Duration::ZERO,
                    stop: None,
                }
            }
            MotionAction::Step { pan, tilt, zoom } => (pan, tilt, zoom),
        };

        let mut start = Vec::with_capacity(2);
        if let Some(direction) = direction(pan, tilt) {
            start.push(format!(
                "ptzcmd&{}&{}&{}",
                direction,
                speed(pan, MAX_PAN_SPEED),
                speed(tilt, MAX_TILT_SPEED)
            ));
        }
        if zoom != 0.0 {
            let verb = if zoom > 0.0 { "zoomin" } else { "zoomout" };
            start.push(format!("ptzcmd&{}&{}", verb, speed(zoom, MAX_ZOOM_SPEED)));
        }

        if start.is_empty() {
            return PulsePlan {
                start,
                hold: Duration::ZERO,
                stop: None,
            };
        }
        PulsePlan {
            start,
            hold: self.pulse,
            stop: Some(STOP),
        }
    }
}

fn direction(pan: f32, tilt: f32) -> Option<&'static str> {
    let horizontal = if pan > 0.0 {
        Some("right")
    } else if pan < 0.0 {
        Some("left")
    } else {
        None
    };
    let vertical = if tilt > 0.0 {
        Some("up")
    } else if tilt < 0.0 {
        Some("down")
    } else {
        None
    };
    match (vertical, horizontal) {
        (None, None) => None,
        (None, Some(h)) => Some(h),
        (Some(v), None) => Some(v),
        (Some("up"), Some("left")) => Some("upleft"),
        (Some("up"), Some(_)) => Some("upright"),
        (Some(_), Some("left")) => Some("downleft"),
        (Some(_), Some(_)) => Some("downright"),
    }
}

/// Map a step magnitude in [0, 1] onto the camera's 1..=max speed range.
fn speed(step: f32, max: u8) -> u8 {
    let scaled = (step.abs().min(1.0) * f32::from(max)).ceil() as u8;
    scaled.clamp(1, max)
}

// ----------------------------------------------------------------------------
// HTTP transport
// ----------------------------------------------------------------------------

#[cfg(feature = "actuator-http")]
pub use http::HttpActuator;

#[cfg(feature = "actuator-http")]
mod http {
    use std::time::Duration;

    use super::PtzOpticsEncoder;
    use crate::actuator::Actuator;
    use crate::command::MotionCommand;
    use crate::error::ActuatorError;

    const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

    pub struct HttpActuator {
        base_url: String,
        encoder: PtzOpticsEncoder,
        agent: ureq::Agent,
    }

    impl HttpActuator {
        pub fn new(address: &str, encoder: PtzOpticsEncoder) -> Self {
            Self {
                base_url: format!("http://{}/cgi-bin/ptzctrl.cgi?", address.trim_end_matches('/')),
                encoder,
                agent: build_agent(),
            }
        }

        fn get(&self, query: &str) -> Result<(), ActuatorError> {
            let url = format!("{}{}", self.base_url, query);
            log::debug!("ptzoptics: GET {}", url);
            match self.agent.get(&url).call() {
                Ok(_) => Ok(()),
                Err(ureq::Error::Status(code, _)) => Err(ActuatorError::Rejected(format!(
                    "{} returned HTTP {}",
                    query, code
                ))),
                Err(ureq::Error::Transport(err)) => {
                    Err(ActuatorError::Unreachable(err.to_string()))
                }
            }
        }
    }

    impl Actuator for HttpActuator {
        fn name(&self) -> &str {
            "ptzoptics"
        }

        fn send(&mut self, command: &MotionCommand) -> Result<(), ActuatorError> {
            let plan = self.encoder.encode(command);
            for query in &plan.start {
                if let Err(err) = self.get(query) {
                    // Best effort: never leave the head moving after a partial start.
                    if plan.stop.is_some() {
                        let _ = self.get(super::STOP);
                    }
                    return Err(err);
                }
            }
            if let Some(stop) = plan.stop {
                std::thread::sleep(plan.hold);
                self.get(stop)?;
            }
            Ok(())
        }

        fn reconnect(&mut self) -> Result<(), ActuatorError> {
            self.agent = build_agent();
            self.get(super::STOP)
        }
    }

    fn build_agent() -> ureq::Agent {
        ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build()
    }
}
