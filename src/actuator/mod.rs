//! PTZ actuators.
//!
//! The dispatcher only needs `send` and `reconnect`; how a command reaches the head is
//! the actuator's business.

mod logging;
pub mod ptzoptics;
mod simulated;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::command::MotionCommand;
use crate::config::ActuatorSettings;
use crate::error::ActuatorError;

pub use logging::LoggingActuator;
pub use ptzoptics::{PtzOpticsEncoder, PulsePlan};
#[cfg(feature = "actuator-http")]
pub use ptzoptics::HttpActuator;
pub use simulated::{HeadPosition, SentCommand, SimulatedHead};

pub trait Actuator: Send {
    fn name(&self) -> &str;

    /// Execute one command. Blocking; called only from the dispatcher thread.
    fn send(&mut self, command: &MotionCommand) -> Result<(), ActuatorError>;

    /// Re-establish the link after a failure. Only ever called explicitly.
    fn reconnect(&mut self) -> Result<(), ActuatorError> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Build the actuator named by `settings.kind`.
pub fn from_settings(settings: &ActuatorSettings) -> Result<Box<dyn Actuator>> {
    match settings.kind.as_str() {
        "log" => Ok(Box::new(LoggingActuator::new())),
        "simulated" => Ok(Box::new(SimulatedHead::new())),
        "ptzoptics" => build_http(settings),
        other => Err(anyhow!("unknown actuator kind {:?}", other)),
    }
}

#[cfg(feature = "actuator-http")]
fn build_http(settings: &ActuatorSettings) -> Result<Box<dyn Actuator>> {
    let address = settings
        .address
        .as_deref()
        .ok_or_else(|| anyhow!("ptzoptics actuator requires a camera address"))?;
    Ok(Box::new(HttpActuator::new(
        address,
        PtzOpticsEncoder::new(settings.pulse),
    )))
}

#[cfg(not(feature = "actuator-http"))]
fn build_http(_settings: &ActuatorSettings) -> Result<Box<dyn Actuator>> {
    Err(anyhow!(
        "ptzoptics actuator requires building with --features actuator-http"
    ))
}
