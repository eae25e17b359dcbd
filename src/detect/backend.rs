use crate::detect::result::{DetectionBox, SubjectId};
use crate::error::DetectorFailure;
use crate::frame::Frame;

/// Stateless detector backend.
///
/// Implementations may be on-device models or remote calls; either way the call can be slow,
/// so it only ever runs on the detection worker thread.
pub trait DetectorBackend: Send {
    /// Backend identifier, also reported as the telemetry model name.
    fn name(&self) -> &'static str;

    /// Run detection on a frame. Boxes may come back in any order.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectionBox>, DetectorFailure>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<(), DetectorFailure> {
        Ok(())
    }
}

/// Result of advancing a stateful tracker by one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerUpdate {
    pub subject: DetectionBox,
    pub is_lost: bool,
}

/// Optional stateful tracker, preferred over re-detection for frame-to-frame continuity.
pub trait SubjectTracker: Send {
    /// Begin tracking the subject inside `seed`. Returns `None` when the tracker
    /// refuses the region (e.g. empty box).
    fn start_tracking(&mut self, seed: &DetectionBox) -> Option<SubjectId>;

    /// Advance the tracker. `Ok(None)` means the id is unknown to the tracker.
    fn update_tracking(
        &mut self,
        id: &SubjectId,
        frame: &Frame,
    ) -> Result<Option<TrackerUpdate>, DetectorFailure>;

    fn stop_tracking(&mut self, id: &SubjectId);
}
