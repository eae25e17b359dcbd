use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FailureKind;

/// Opaque correlation id handed out by a stateful tracker.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single detection candidate.
///
/// `x`/`y` are the box center and `width`/`height` its extent, all normalized to the frame
/// (0..1, origin top-left, y grows downward).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionBox {
    pub label: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub subject_id: Option<SubjectId>,
}

impl DetectionBox {
    pub fn new(
        label: impl Into<String>,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        confidence: f32,
    ) -> Self {
        Self {
            label: label.into(),
            x,
            y,
            width,
            height,
            confidence,
            subject_id: None,
        }
    }

    pub fn with_subject(mut self, id: SubjectId) -> Self {
        self.subject_id = Some(id);
        self
    }

    /// Framing size used for zoom control.
    pub fn size(&self) -> f32 {
        self.width.max(self.height)
    }

    pub fn center_distance(&self, other: &DetectionBox) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Closed set of things a detector call can produce.
#[derive(Clone, Debug, PartialEq)]
pub enum DetectorOutcome {
    /// Stateless detection, ranked by confidence descending. May be empty.
    Detections(Vec<DetectionBox>),
    /// Stateful tracker update for the subject it was started on.
    TrackingUpdate { subject: DetectionBox, is_lost: bool },
    Failure { kind: FailureKind },
}

impl DetectorOutcome {
    /// Highest confidence in the outcome, 0 when nothing was seen.
    pub fn peak_confidence(&self) -> f32 {
        match self {
            DetectorOutcome::Detections(boxes) => boxes.first().map_or(0.0, |b| b.confidence),
            DetectorOutcome::TrackingUpdate { subject, is_lost } => {
                if *is_lost {
                    0.0
                } else {
                    subject.confidence
                }
            }
            DetectorOutcome::Failure { .. } => 0.0,
        }
    }

    pub fn object_count(&self) -> usize {
        match self {
            DetectorOutcome::Detections(boxes) => boxes.len(),
            DetectorOutcome::TrackingUpdate { is_lost, .. } => usize::from(!*is_lost),
            DetectorOutcome::Failure { .. } => 0,
        }
    }
}
