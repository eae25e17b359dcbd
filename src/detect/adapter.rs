use crate::detect::backend::{DetectorBackend, SubjectTracker};
use crate::detect::result::{DetectionBox, DetectorOutcome, SubjectId};
use crate::frame::Frame;

/// How frame-to-frame continuity is obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackingMode {
    /// Full detection on every frame; continuity by nearest-neighbour matching.
    DetectionOnly,
    /// Full detection until a subject is accepted, then a stateful tracker seeded from it.
    Hybrid,
}

impl TrackingMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "detection-only" | "detection_only" => Some(TrackingMode::DetectionOnly),
            "hybrid" | "hybrid-vision" => Some(TrackingMode::Hybrid),
            _ => None,
        }
    }
}

/// Uniform front for a detector backend plus an optional stateful tracker.
///
/// Everything leaving the adapter is a `DetectorOutcome`; backend error strings are logged
/// here and reduced to a failure kind.
pub struct DetectorAdapter {
    backend: Box<dyn DetectorBackend>,
    tracker: Option<Box<dyn SubjectTracker>>,
    mode: TrackingMode,
    subject_label: Option<String>,
    active: Option<SubjectId>,
    /// Seed of the last session the tracker lost. Re-seeding from it would only lose again.
    lost_seed: Option<DetectionBox>,
}

impl DetectorAdapter {
    pub fn new(backend: Box<dyn DetectorBackend>) -> Self {
        Self {
            backend,
            tracker: None,
            mode: TrackingMode::DetectionOnly,
            subject_label: None,
            active: None,
            lost_seed: None,
        }
    }

    pub fn with_tracker(mut self, tracker: Box<dyn SubjectTracker>) -> Self {
        self.tracker = Some(tracker);
        self.mode = TrackingMode::Hybrid;
        self
    }

    pub fn with_mode(mut self, mode: TrackingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Only boxes with this label (case-insensitive) are reported.
    pub fn with_subject_label(mut self, label: Option<String>) -> Self {
        self.subject_label = label;
        self
    }

    pub fn model_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn active_subject(&self) -> Option<&SubjectId> {
        self.active.as_ref()
    }

    /// Run one detection request.
    ///
    /// `hint` is the subject the state machine currently follows (absent while searching).
    /// In hybrid mode a hint seeds or advances the tracker; without one any tracker
    /// session is ended and a full detection runs. After the tracker loses a subject, full
    /// detection runs until the hint changes to a freshly accepted box.
    pub fn request_detections(
        &mut self,
        frame: &Frame,
        hint: Option<&DetectionBox>,
    ) -> DetectorOutcome {
        let seed = match hint {
            Some(seed) if self.mode == TrackingMode::Hybrid && self.tracker.is_some() => seed,
            _ => {
                self.reset();
                self.lost_seed = None;
                return self.detect(frame);
            }
        };
        if self.lost_seed.as_ref() == Some(seed) {
            return self.detect(frame);
        }
        self.lost_seed = None;
        match self.track(frame, seed) {
            Some(outcome) => outcome,
            None => self.detect(frame),
        }
    }

    /// End any active tracker session.
    pub fn reset(&mut self) {
        if let (Some(id), Some(tracker)) = (self.active.take(), self.tracker.as_mut()) {
            log::debug!("detector: stopping tracker session {}", id);
            tracker.stop_tracking(&id);
        }
    }

    pub fn warm_up(&mut self) -> Result<(), crate::error::DetectorFailure> {
        self.backend.warm_up()
    }

    fn track(&mut self, frame: &Frame, seed: &DetectionBox) -> Option<DetectorOutcome> {
        let tracker = self.tracker.as_mut()?;
        let id = match self.active.clone() {
            Some(id) => id,
            None => {
                let id = tracker.start_tracking(seed)?;
                log::debug!("detector: started tracker session {}", id);
                self.active = Some(id.clone());
                id
            }
        };

        match tracker.update_tracking(&id, frame) {
            Ok(Some(update)) => {
                if update.is_lost {
                    log::debug!("detector: tracker lost subject {}", id);
                    tracker.stop_tracking(&id);
                    self.active = None;
                    self.lost_seed = Some(seed.clone());
                }
                Some(DetectorOutcome::TrackingUpdate {
                    subject: update.subject.with_subject(id),
                    is_lost: update.is_lost,
                })
            }
            Ok(None) => {
                self.active = None;
                None
            }
            Err(failure) => {
                log::debug!("detector: tracker update failed: {}", failure);
                Some(DetectorOutcome::Failure {
                    kind: failure.kind(),
                })
            }
        }
    }

    fn detect(&mut self, frame: &Frame) -> DetectorOutcome {
        match self.backend.detect(frame) {
            Ok(mut boxes) => {
                if let Some(label) = &self.subject_label {
                    boxes.retain(|b| b.label.eq_ignore_ascii_case(label));
                }
                boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
                DetectorOutcome::Detections(boxes)
            }
            Err(failure) => {
                log::debug!(
                    "detector {}: frame {} failed: {}",
                    self.backend.name(),
                    frame.sequence,
                    failure
                );
                DetectorOutcome::Failure {
                    kind: failure.kind(),
                }
            }
        }
    }
}
