use crate::actuator::Actuator;
use crate::command::MotionCommand;
use crate::error::ActuatorError;

/// Dry-run actuator: records each command in the log and always succeeds.
#[derive(Debug, Default)]
pub struct LoggingActuator {
    sent: u64,
}

impl LoggingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl Actuator for LoggingActuator {
    fn name(&self) -> &str {
        "log"
    }

    fn send(&mut self, command: &MotionCommand) -> Result<(), ActuatorError> {
        self.sent += 1;
        log::info!("ptz {}", command);
        Ok(())
    }
}
