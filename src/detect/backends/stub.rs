use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::DetectionBox;
use crate::error::DetectorFailure;
use crate::frame::Frame;

type Script = Arc<Mutex<VecDeque<Result<Vec<DetectionBox>, DetectorFailure>>>>;

/// Scripted backend for testing. Replays queued responses in order and returns an empty
/// detection once the script runs dry.
///
/// The script is shared, so a test can keep feeding it after the backend has been moved
/// onto the detection worker.
#[derive(Clone, Default)]
pub struct StubBackend {
    script: Script,
    latency: Option<Duration>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every `detect` call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push(&self, response: Result<Vec<DetectionBox>, DetectorFailure>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(response);
        }
    }

    pub fn push_boxes(&self, boxes: Vec<DetectionBox>) {
        self.push(Ok(boxes));
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<DetectionBox>, DetectorFailure> {
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
        let next = self
            .script
            .lock()
            .map_err(|_| DetectorFailure::Error("stub script lock poisoned".into()))?
            .pop_front();
        next.unwrap_or_else(|| Ok(Vec::new()))
    }
}
