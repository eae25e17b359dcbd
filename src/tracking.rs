//! Tracking state machine.
//!
//! ```text
//!   Idle --enable--> Searching --accepted--> Tracking --N in deadzone--> Locked
//!                        ^                     |  ^                        |
//!                        |                     |  +----outside deadzone----+
//!                   grace elapsed          misses ≥ threshold (either state)
//!                        |                     v
//!                        +------------------ Lost --accepted--> Tracking
//!   any --disable--> Idle
//! ```
//!
//! Only `enable`/`disable` come from outside; everything else is driven by detector
//! results (`apply`) and the clock (`tick`). Each step builds the next `TrackingState`
//! and swaps it in whole, so readers never observe a half-applied transition.

use serde::Serialize;
use std::fmt;
use std::time::Instant;

use crate::command::MotionCommand;
use crate::config::TrackingSettings;
use crate::control::MotionController;
use crate::detect::{DetectionBox, DetectorOutcome, SubjectId};
use crate::error::FailureKind;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum TrackingPhase {
    #[default]
    Idle,
    Searching,
    Tracking,
    Locked,
    Lost,
}

impl TrackingPhase {
    /// Phases in which a subject is being followed.
    pub fn is_following(self) -> bool {
        matches!(self, TrackingPhase::Tracking | TrackingPhase::Locked)
    }
}

impl fmt::Display for TrackingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The detection the machine last accepted.
#[derive(Clone, Debug, PartialEq)]
pub struct AcceptedDetection {
    pub subject: DetectionBox,
    pub frame_sequence: u64,
    pub captured_at: Instant,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackingState {
    pub phase: TrackingPhase,
    pub last_detection: Option<AcceptedDetection>,
    pub in_deadzone: bool,
    pub locked_subject_id: Option<SubjectId>,
    /// Consecutive results without a qualifying detection.
    pub missed_frame_count: u32,
    /// Consecutive accepted detections inside the deadzone.
    pub deadzone_streak: u32,
    /// Times a lost subject was picked up again before the grace period ran out.
    pub reacquisitions: u32,
    /// Consecutive accepted results that came from the stateful tracker.
    pub tracked_frames: u32,
    pub lost_since: Option<Instant>,
}

/// Conditions the surrounding application must be told about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Escalation {
    /// The detector kept reporting `Unavailable`; tracking was switched off.
    DetectorUnavailable { consecutive: u32 },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepOutcome {
    /// False when the result was stale, duplicated, or arrived while idle.
    pub applied: bool,
    pub transition: Option<(TrackingPhase, TrackingPhase)>,
    pub command: Option<MotionCommand>,
    pub escalation: Option<Escalation>,
}

pub struct TrackingStateMachine {
    settings: TrackingSettings,
    loss_threshold: u32,
    state: TrackingState,
    last_applied: Option<u64>,
    consecutive_unavailable: u32,
}

impl TrackingStateMachine {
    /// `expected_fps` converts the loss timeout into a frame-count threshold.
    pub fn new(settings: TrackingSettings, expected_fps: f32) -> Self {
        Self {
            loss_threshold: settings.loss_threshold_frames(expected_fps),
            settings,
            state: TrackingState::default(),
            last_applied: None,
            consecutive_unavailable: 0,
        }
    }

    pub fn state(&self) -> &TrackingState {
        &self.state
    }

    pub fn phase(&self) -> TrackingPhase {
        self.state.phase
    }

    pub fn loss_threshold(&self) -> u32 {
        self.loss_threshold
    }

    /// The box the detector should keep following, if any.
    pub fn tracking_hint(&self) -> Option<&DetectionBox> {
        if self.state.phase.is_following() {
            self.state.last_detection.as_ref().map(|d| &d.subject)
        } else {
            None
        }
    }

    /// `Idle → Searching`. No-op when already enabled.
    pub fn enable(&mut self) -> Option<(TrackingPhase, TrackingPhase)> {
        if self.state.phase != TrackingPhase::Idle {
            return None;
        }
        self.consecutive_unavailable = 0;
        self.commit(TrackingState {
            phase: TrackingPhase::Searching,
            ..TrackingState::default()
        })
    }

    /// Any phase → `Idle`, discarding all subject state.
    pub fn disable(&mut self) -> Option<(TrackingPhase, TrackingPhase)> {
        self.consecutive_unavailable = 0;
        if self.state.phase == TrackingPhase::Idle {
            return None;
        }
        self.commit(TrackingState::default())
    }

    /// Fold one detector result into the state.
    ///
    /// `captured_at` is the capture instant of the frame the result belongs to. Results for
    /// frames not newer than the last applied one are ignored.
    pub fn apply(
        &mut self,
        frame_sequence: u64,
        captured_at: Instant,
        outcome: &DetectorOutcome,
        controller: &mut MotionController,
    ) -> StepOutcome {
        if self.state.phase == TrackingPhase::Idle {
            return StepOutcome::default();
        }
        if self.last_applied.is_some_and(|last| frame_sequence <= last) {
            log::debug!(
                "tracking: discarding stale result for frame {} (last applied {:?})",
                frame_sequence,
                self.last_applied
            );
            return StepOutcome::default();
        }
        self.last_applied = Some(frame_sequence);

        let mut step = StepOutcome {
            applied: true,
            ..StepOutcome::default()
        };

        match outcome {
            DetectorOutcome::Failure { kind } => {
                if *kind == FailureKind::Unavailable {
                    self.consecutive_unavailable += 1;
                    if self.consecutive_unavailable >= self.settings.unavailable_limit {
                        let consecutive = self.consecutive_unavailable;
                        log::warn!(
                            "tracking: detector unavailable {} times in a row; disabling",
                            consecutive
                        );
                        step.transition = self.disable();
                        step.escalation = Some(Escalation::DetectorUnavailable { consecutive });
                        controller.reset();
                        return step;
                    }
                } else {
                    self.consecutive_unavailable = 0;
                }
                step.transition = self.miss(captured_at, false, controller);
            }
            DetectorOutcome::Detections(boxes) => {
                self.consecutive_unavailable = 0;
                match self.select(boxes).cloned() {
                    Some(subject) => {
                        let (transition, command) =
                            self.accept(subject, frame_sequence, captured_at, false, controller);
                        step.transition = transition;
                        step.command = command;
                    }
                    None => step.transition = self.miss(captured_at, false, controller),
                }
            }
            DetectorOutcome::TrackingUpdate { subject, is_lost } => {
                self.consecutive_unavailable = 0;
                if *is_lost || subject.confidence < self.settings.min_confidence {
                    step.transition = self.miss(captured_at, *is_lost, controller);
                } else {
                    let (transition, command) = self.accept(
                        subject.clone(),
                        frame_sequence,
                        captured_at,
                        true,
                        controller,
                    );
                    step.transition = transition;
                    step.command = command;
                }
            }
        }
        step
    }

    /// Clock-driven transitions: loss once `loss_timeout` has passed since the last accepted
    /// detection, even when no result arrives to count as a miss, and `Lost → Searching` once
    /// the grace period has passed.
    pub fn tick(
        &mut self,
        now: Instant,
        controller: &mut MotionController,
    ) -> Option<(TrackingPhase, TrackingPhase)> {
        match self.state.phase {
            TrackingPhase::Tracking | TrackingPhase::Locked => {
                let last = self.state.last_detection.as_ref()?;
                let gap = now.saturating_duration_since(last.captured_at);
                if gap < self.settings.loss_timeout {
                    return None;
                }
                log::info!("tracking: nothing accepted for {:?}; subject lost", gap);
                controller.reset();
                let mut next = self.state.clone();
                next.phase = TrackingPhase::Lost;
                next.in_deadzone = false;
                next.deadzone_streak = 0;
                next.missed_frame_count = next.missed_frame_count.max(self.loss_threshold);
                next.lost_since = Some(now);
                self.commit(next)
            }
            TrackingPhase::Lost => {
                let since = self.state.lost_since?;
                if now.saturating_duration_since(since) < self.settings.lost_grace {
                    return None;
                }
                self.commit(TrackingState {
                    phase: TrackingPhase::Searching,
                    reacquisitions: self.state.reacquisitions,
                    ..TrackingState::default()
                })
            }
            TrackingPhase::Idle | TrackingPhase::Searching => None,
        }
    }

    /// Pick the candidate to follow.
    ///
    /// Matching subject id first, then nearest center to the previous accepted box (ties
    /// to higher confidence), then highest confidence.
    fn select<'a>(&self, boxes: &'a [DetectionBox]) -> Option<&'a DetectionBox> {
        let min = self.settings.min_confidence;
        let qualifying = || boxes.iter().filter(move |b| b.confidence >= min);

        if let Some(id) = &self.state.locked_subject_id {
            if let Some(matched) = qualifying().find(|b| b.subject_id.as_ref() == Some(id)) {
                return Some(matched);
            }
        }

        match &self.state.last_detection {
            Some(prev) => qualifying().min_by(|a, b| {
                a.center_distance(&prev.subject)
                    .total_cmp(&b.center_distance(&prev.subject))
                    .then(b.confidence.total_cmp(&a.confidence))
            }),
            // First of equally confident candidates wins.
            None => qualifying().fold(None, |best: Option<&DetectionBox>, b| match best {
                Some(best) if best.confidence >= b.confidence => Some(best),
                _ => Some(b),
            }),
        }
    }

    fn accept(
        &mut self,
        subject: DetectionBox,
        frame_sequence: u64,
        captured_at: Instant,
        from_tracker: bool,
        controller: &mut MotionController,
    ) -> (Option<(TrackingPhase, TrackingPhase)>, Option<MotionCommand>) {
        let decision = controller.evaluate(&subject);
        let prev = &self.state;

        let reacquired = prev.phase == TrackingPhase::Lost;
        let streak_base = if prev.phase.is_following() {
            prev.deadzone_streak
        } else {
            0
        };
        let deadzone_streak = if decision.in_deadzone {
            streak_base + 1
        } else {
            0
        };
        let phase = if deadzone_streak >= self.settings.lock_frames {
            TrackingPhase::Locked
        } else {
            TrackingPhase::Tracking
        };
        if reacquired {
            log::info!("tracking: subject re-acquired at frame {}", frame_sequence);
        }

        let next = TrackingState {
            phase,
            locked_subject_id: subject.subject_id.clone(),
            last_detection: Some(AcceptedDetection {
                subject,
                frame_sequence,
                captured_at,
            }),
            in_deadzone: decision.in_deadzone,
            missed_frame_count: 0,
            deadzone_streak,
            reacquisitions: prev.reacquisitions + u32::from(reacquired),
            tracked_frames: if from_tracker {
                prev.tracked_frames + 1
            } else {
                0
            },
            lost_since: None,
        };
        (self.commit(next), decision.command)
    }

    fn miss(
        &mut self,
        captured_at: Instant,
        tracker_lost: bool,
        controller: &mut MotionController,
    ) -> Option<(TrackingPhase, TrackingPhase)> {
        let mut next = self.state.clone();
        next.missed_frame_count = next.missed_frame_count.saturating_add(1);
        next.deadzone_streak = 0;
        next.tracked_frames = 0;
        if tracker_lost {
            next.locked_subject_id = None;
        }

        if next.phase.is_following() {
            let gap = next
                .last_detection
                .as_ref()
                .map(|d| captured_at.saturating_duration_since(d.captured_at))
                .unwrap_or_default();
            if next.missed_frame_count >= self.loss_threshold || gap >= self.settings.loss_timeout
            {
                log::info!(
                    "tracking: subject lost after {} misses ({:?} since last detection)",
                    next.missed_frame_count,
                    gap
                );
                controller.reset();
                next.phase = TrackingPhase::Lost;
                next.in_deadzone = false;
                next.lost_since = Some(captured_at);
            } else {
                // Locked requires a fresh detection.
                next.phase = TrackingPhase::Tracking;
            }
        }
        log::debug!(
            "tracking: miss #{} in {}",
            next.missed_frame_count,
            next.phase
        );
        self.commit(next)
    }

    fn commit(&mut self, next: TrackingState) -> Option<(TrackingPhase, TrackingPhase)> {
        let from = self.state.phase;
        let to = next.phase;
        self.state = next;
        if from != to {
            log::info!("tracking: {} -> {}", from, to);
            Some((from, to))
        } else {
            None
        }
    }
}
