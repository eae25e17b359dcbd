//! Tracking session: owns one control loop and everything it drives.
//!
//! Created with `TrackingSession::start`, driven by `step`/`run`, destroyed with
//! `shutdown`. Nothing is global, so several sessions can run side by side. The UI side
//! talks to the session only through a `SessionHandle` and the event receiver.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::actuator::{Actuator, ConnectionState};
use crate::command::{MotionCommand, PtzDirection, SequenceCounter};
use crate::config::TrackerConfig;
use crate::control::MotionController;
use crate::detect::{DetectorAdapter, DetectorOutcome};
use crate::dispatch::{DispatchHandle, Dispatcher, Submission};
use crate::error::{ActuatorError, FailureKind};
use crate::frame::{Frame, FrameSource};
use crate::scheduler::{
    Admission, Completion, DetectionResponse, DetectionWorker, FrameScheduler,
};
use crate::snapshot::Snapshot;
use crate::telemetry::{PerformanceStats, TelemetryAggregator};
use crate::tracking::{
    Escalation, StepOutcome, TrackingPhase, TrackingState, TrackingStateMachine,
};

/// Longest the run loop sleeps between steps.
const MAX_IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Things the UI must be told about.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    PhaseChanged {
        from: TrackingPhase,
        to: TrackingPhase,
    },
    /// The detector kept failing as unavailable; tracking was switched off.
    DetectorUnavailable { consecutive: u32 },
    /// A command failed; tracking was switched off and the actuator is disconnected.
    ActuatorFailed { sequence: u64, error: ActuatorError },
    ActuatorReconnected,
}

/// Requested tracking state, written by handles and read by the loop.
///
/// Every change bumps `epoch`; detection results tagged with an older epoch are discarded.
#[derive(Debug, Default)]
struct SessionControl {
    enabled: AtomicBool,
    epoch: AtomicU64,
}

impl SessionControl {
    /// Returns the new epoch when the request changed.
    fn set_enabled(&self, enabled: bool) -> Option<u64> {
        if self.enabled.swap(enabled, Ordering::SeqCst) == enabled {
            return None;
        }
        Some(self.epoch.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

/// The UI side of a session. Cheap to clone; never blocks on the control loop.
#[derive(Clone)]
pub struct SessionHandle {
    control: Arc<SessionControl>,
    dispatch: DispatchHandle,
    sequence: SequenceCounter,
    nudge_step: f32,
    state: Arc<Snapshot<TrackingState>>,
    stats: Arc<Snapshot<PerformanceStats>>,
    events: Sender<SessionEvent>,
}

impl SessionHandle {
    pub fn enable_tracking(&self) {
        if self.control.set_enabled(true).is_some() {
            log::info!("session: tracking enabled");
        }
    }

    /// Stops command production at once. Any detection in flight is ignored when it lands,
    /// and no automatic command is queued once this returns; an actuator call in progress
    /// is left to finish.
    pub fn disable_tracking(&self) {
        if let Some(epoch) = self.control.set_enabled(false) {
            log::info!("session: tracking disabled");
            self.dispatch.close_epochs_before(epoch);
        }
    }

    pub fn is_tracking_enabled(&self) -> bool {
        self.control.enabled()
    }

    /// Manual nudge. Allowed in every phase and does not touch the tracking state.
    pub fn fine_tune(&self, direction: PtzDirection) -> Submission {
        let command = direction.nudge(self.sequence.next(), self.nudge_step);
        log::debug!("session: fine-tune {:?}", direction);
        self.dispatch.submit(command)
    }

    pub fn home(&self) -> Submission {
        self.dispatch.submit(MotionCommand::home(self.sequence.next()))
    }

    pub fn reconnect_actuator(&self) -> Result<(), ActuatorError> {
        self.dispatch.reconnect()?;
        let _ = self.events.send(SessionEvent::ActuatorReconnected);
        Ok(())
    }

    pub fn tracking_state(&self) -> Arc<TrackingState> {
        self.state.load()
    }

    pub fn stats(&self) -> Arc<PerformanceStats> {
        self.stats.load()
    }

    pub fn connection(&self) -> ConnectionState {
        self.dispatch.connection()
    }
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
struct Pending {
    frame_sequence: u64,
    captured_at: Instant,
    epoch: u64,
}

pub struct TrackingSession {
    scheduler: FrameScheduler,
    worker: DetectionWorker,
    machine: TrackingStateMachine,
    controller: MotionController,
    dispatcher: Dispatcher,
    telemetry: TelemetryAggregator,
    control: Arc<SessionControl>,
    sequence: SequenceCounter,
    nudge_step: f32,
    state: Arc<Snapshot<TrackingState>>,
    events: Sender<SessionEvent>,
    pending: Option<Pending>,
    machine_epoch: u64,
}

impl TrackingSession {
    /// Validate `config`, spawn the detector and dispatcher threads, and return the session
    /// with its handle and event stream. Tracking starts disabled.
    pub fn start(
        config: &TrackerConfig,
        detector: DetectorAdapter,
        actuator: Box<dyn Actuator>,
    ) -> Result<(Self, SessionHandle, Receiver<SessionEvent>)> {
        config.validate().context("invalid tracker configuration")?;

        let model_name = detector.model_name();
        let actuator_name = actuator.name().to_string();
        let worker = DetectionWorker::spawn(detector)?;
        let dispatcher = Dispatcher::spawn(actuator, &config.dispatcher)?;
        let sequence = SequenceCounter::new();
        let (events_tx, events_rx) = mpsc::channel();

        let session = Self {
            scheduler: FrameScheduler::new(&config.scheduler)?,
            worker,
            machine: TrackingStateMachine::new(
                config.tracking.clone(),
                config.scheduler.target_fps,
            ),
            controller: MotionController::new(config.controller.clone(), sequence.clone()),
            dispatcher,
            telemetry: TelemetryAggregator::new(&config.telemetry, model_name),
            control: Arc::new(SessionControl::default()),
            sequence,
            nudge_step: config.controller.nudge_step,
            state: Arc::new(Snapshot::new(TrackingState::default())),
            events: events_tx,
            pending: None,
            machine_epoch: 0,
        };
        log::info!(
            "session: started (detector={}, actuator={}, {} fps, loss after {} frames)",
            model_name,
            actuator_name,
            config.scheduler.target_fps,
            session.machine.loss_threshold()
        );
        let handle = session.handle();
        Ok((session, handle, events_rx))
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            control: Arc::clone(&self.control),
            dispatch: self.dispatcher.handle(),
            sequence: self.sequence.clone(),
            nudge_step: self.nudge_step,
            state: Arc::clone(&self.state),
            stats: self.telemetry.shared(),
            events: self.events.clone(),
        }
    }

    pub fn tracking_state(&self) -> &TrackingState {
        self.machine.state()
    }

    pub fn stats(&self) -> &PerformanceStats {
        self.telemetry.stats()
    }

    /// One pass of the control loop at `now`.
    pub fn step(&mut self, source: &mut dyn FrameSource, now: Instant) -> Result<()> {
        self.reconcile();

        while let Some(response) = self.worker.try_recv()? {
            self.on_response(response, now);
        }
        if let Some(frame_sequence) = self.scheduler.check_timeout(now) {
            self.on_timeout(frame_sequence, now);
        }
        while let Some(failure) = self.dispatcher.try_failure() {
            log::warn!(
                "session: actuator failed on command {}: {}",
                failure.sequence,
                failure.error
            );
            self.force_idle();
            self.emit(SessionEvent::ActuatorFailed {
                sequence: failure.sequence,
                error: failure.error,
            });
        }
        if let Some((from, to)) = self.machine.tick(now, &mut self.controller) {
            self.emit(SessionEvent::PhaseChanged { from, to });
        }

        if self.machine.phase() != TrackingPhase::Idle {
            self.sample(source, now)?;
        }
        self.telemetry.record_bitrate(source.bitrate_kbps());
        self.publish_state();
        Ok(())
    }

    /// Drive the loop in real time until `shutdown` is set.
    pub fn run(&mut self, source: &mut dyn FrameSource, shutdown: &AtomicBool) -> Result<()> {
        while !shutdown.load(Ordering::SeqCst) {
            let now = Instant::now();
            self.step(source, now)?;
            let sleep = self.scheduler.until_due(now).min(MAX_IDLE_SLEEP);
            if !sleep.is_zero() {
                std::thread::sleep(sleep);
            }
        }
        Ok(())
    }

    /// Stop both worker threads. The session is gone afterwards.
    pub fn shutdown(self) -> Result<()> {
        let Self {
            worker, dispatcher, ..
        } = self;
        worker.stop().context("stop detector worker")?;
        dispatcher.stop().context("stop dispatcher")?;
        log::info!("session: stopped");
        Ok(())
    }

    fn sample(&mut self, source: &mut dyn FrameSource, now: Instant) -> Result<()> {
        match self.scheduler.admit(now) {
            Admission::NotDue => {}
            Admission::Dropped { frame_sequence } => {
                log::debug!("session: frame {} dropped, detector busy", frame_sequence);
                self.telemetry.record_dropped(self.scheduler.dropped_frames());
            }
            Admission::Submit { frame_sequence } => {
                let image = match source.capture() {
                    Ok(image) => image,
                    Err(err) => {
                        log::warn!("session: capture from {} failed: {}", source.name(), err);
                        self.scheduler.cancel(frame_sequence);
                        return Ok(());
                    }
                };
                let frame = Frame::new(frame_sequence, now, image);
                let epoch = self.control.epoch();
                let hint = self.machine.tracking_hint().cloned();
                if let Err(err) = self.worker.submit(frame, hint, epoch) {
                    self.scheduler.cancel(frame_sequence);
                    return Err(err);
                }
                self.pending = Some(Pending {
                    frame_sequence,
                    captured_at: now,
                    epoch,
                });
            }
        }
        Ok(())
    }

    fn on_response(&mut self, response: DetectionResponse, now: Instant) {
        match self.scheduler.complete(response.frame_sequence, now) {
            Completion::Fresh { latency } => {
                log::debug!(
                    "session: frame {} answered in {:?}",
                    response.frame_sequence,
                    latency
                );
            }
            Completion::Late { latency } => {
                log::debug!(
                    "session: discarding late result for frame {} ({:?})",
                    response.frame_sequence,
                    latency
                );
                self.pending = None;
                return;
            }
            Completion::Unexpected => return,
        }
        self.pending = None;
        self.telemetry.record_completion(now);
        self.telemetry
            .record_result(response.inference_time, &response.outcome);

        if response.epoch != self.control.epoch() {
            log::debug!(
                "session: discarding result for frame {} from epoch {}",
                response.frame_sequence,
                response.epoch
            );
            return;
        }
        let step = self.machine.apply(
            response.frame_sequence,
            response.captured_at,
            &response.outcome,
            &mut self.controller,
        );
        self.on_step(step, response.captured_at, now);
    }

    fn on_timeout(&mut self, frame_sequence: u64, now: Instant) {
        let Some(pending) = self.pending.filter(|p| p.frame_sequence == frame_sequence) else {
            return;
        };
        log::debug!("session: detection for frame {} timed out", frame_sequence);
        let outcome = DetectorOutcome::Failure {
            kind: FailureKind::Timeout,
        };
        self.telemetry.record_completion(now);
        self.telemetry
            .record_result(now.saturating_duration_since(pending.captured_at), &outcome);
        if pending.epoch != self.control.epoch() {
            return;
        }
        let step = self.machine.apply(
            frame_sequence,
            pending.captured_at,
            &outcome,
            &mut self.controller,
        );
        self.on_step(step, pending.captured_at, now);
    }

    fn on_step(&mut self, step: StepOutcome, captured_at: Instant, now: Instant) {
        if let Some(Escalation::DetectorUnavailable { consecutive }) = step.escalation {
            self.control.set_enabled(false);
            self.machine_epoch = self.control.epoch();
            self.after_disable();
            self.emit(SessionEvent::DetectorUnavailable { consecutive });
        }
        if let Some((from, to)) = step.transition {
            self.emit(SessionEvent::PhaseChanged { from, to });
        }
        let Some(command) = step.command else {
            return;
        };
        if !self.control.enabled() || self.machine_epoch != self.control.epoch() {
            return;
        }
        // A handle may disable between the check above and here; the dispatcher refuses
        // the command in that case.
        match self.dispatcher.submit_for_epoch(command, self.machine_epoch) {
            Submission::Queued | Submission::Replaced { .. } => {
                self.telemetry.record_dispatch(captured_at, now);
            }
            Submission::Stale | Submission::Disconnected | Submission::Cancelled => {}
        }
    }

    /// Bring the state machine in line with what the handles asked for.
    fn reconcile(&mut self) {
        let epoch = self.control.epoch();
        if epoch != self.machine_epoch {
            self.machine_epoch = epoch;
            if let Some((from, to)) = self.machine.disable() {
                self.after_disable();
                self.emit(SessionEvent::PhaseChanged { from, to });
            }
        }
        if self.control.enabled() {
            if let Some((from, to)) = self.machine.enable() {
                self.emit(SessionEvent::PhaseChanged { from, to });
            }
        }
    }

    /// Switch tracking off from inside the loop.
    fn force_idle(&mut self) {
        self.control.set_enabled(false);
        self.machine_epoch = self.control.epoch();
        if let Some((from, to)) = self.machine.disable() {
            self.emit(SessionEvent::PhaseChanged { from, to });
        }
        self.after_disable();
    }

    fn after_disable(&mut self) {
        self.controller.reset();
        self.dispatcher.handle().close_epochs_before(self.machine_epoch);
        if let Err(err) = self.worker.reset() {
            log::error!("session: {}", err);
        }
    }

    fn publish_state(&self) {
        if *self.state.load() != *self.machine.state() {
            self.state.publish(self.machine.state().clone());
        }
    }

    fn emit(&self, event: SessionEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::SimulatedHead;
    use crate::command::CommandOrigin;
    use crate::detect::{DetectionBox, StubBackend};
    use crate::error::DetectorFailure;
    use crate::frame::Image;

    struct BlankSource;

    impl FrameSource for BlankSource {
        fn name(&self) -> &str {
            "blank"
        }

        fn capture(&mut self) -> Result<Image> {
            Ok(Image::blank(16, 16))
        }
    }

    fn config() -> TrackerConfig {
        let mut config = TrackerConfig::default();
        config.scheduler.target_fps = 20.0;
        config.scheduler.detection_timeout = Duration::from_secs(2);
        config.dispatcher.min_interval = Duration::from_millis(1);
        config
    }

    fn start(
        stub: &StubBackend,
        head: &SimulatedHead,
    ) -> (TrackingSession, SessionHandle, Receiver<SessionEvent>) {
        TrackingSession::start(
            &config(),
            DetectorAdapter::new(Box::new(stub.clone())),
            Box::new(head.clone()),
        )
        .unwrap()
    }

    /// Step in real time until `done` holds or five seconds pass.
    fn step_until(
        session: &mut TrackingSession,
        mut done: impl FnMut(&TrackingSession) -> bool,
    ) -> bool {
        let started = Instant::now();
        let mut source = BlankSource;
        while started.elapsed() < Duration::from_secs(5) {
            session.step(&mut source, Instant::now()).unwrap();
            if done(session) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn off_center() -> Vec<DetectionBox> {
        vec![DetectionBox::new("person", 0.9, 0.5, 0.1, 0.2, 0.9)]
    }

    #[test]
    fn starts_idle_and_sends_nothing() {
        let stub = StubBackend::new();
        let head = SimulatedHead::new();
        let (mut session, handle, _events) = start(&stub, &head);
        let mut source = BlankSource;
        session.step(&mut source, Instant::now()).unwrap();
        assert_eq!(handle.tracking_state().phase, TrackingPhase::Idle);
        assert_eq!(head.commands_sent(), 0);
        session.shutdown().unwrap();
    }

    #[test]
    fn enabled_session_follows_subject_and_moves_the_head() {
        let stub = StubBackend::new();
        stub.push_boxes(off_center());
        let head = SimulatedHead::new();
        let (mut session, handle, events) = start(&stub, &head);

        handle.enable_tracking();
        assert!(step_until(&mut session, |s| {
            s.tracking_state().phase == TrackingPhase::Tracking
        }));
        let started = Instant::now();
        while head.commands_sent() == 0 && started.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(head.position().pan > 0.0);
        session.step(&mut BlankSource, Instant::now()).unwrap();
        assert_eq!(handle.tracking_state().phase, TrackingPhase::Tracking);
        assert!(handle.stats().latency_ms >= 0.0);
        assert_eq!(handle.stats().model_name, "stub");

        let seen: Vec<SessionEvent> = events.try_iter().collect();
        assert!(seen.contains(&SessionEvent::PhaseChanged {
            from: TrackingPhase::Idle,
            to: TrackingPhase::Searching
        }));
        assert!(seen.contains(&SessionEvent::PhaseChanged {
            from: TrackingPhase::Searching,
            to: TrackingPhase::Tracking
        }));
        session.shutdown().unwrap();
    }

    #[test]
    fn disable_while_detection_in_flight_discards_the_late_result() {
        let stub = StubBackend::new().with_latency(Duration::from_millis(150));
        stub.push_boxes(off_center());
        let head = SimulatedHead::new();
        let (mut session, handle, _events) = start(&stub, &head);

        handle.enable_tracking();
        assert!(step_until(&mut session, |s| s.scheduler.is_busy()));
        handle.disable_tracking();

        assert!(step_until(&mut session, |s| !s.scheduler.is_busy()));
        assert_eq!(*handle.tracking_state(), TrackingState::default());
        assert_eq!(session.tracking_state().phase, TrackingPhase::Idle);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(head.commands_sent(), 0);
        session.shutdown().unwrap();
    }

    #[test]
    fn command_from_a_disabled_epoch_is_refused_by_the_dispatcher() {
        let stub = StubBackend::new();
        let head = SimulatedHead::new();
        let (mut session, handle, _events) = start(&stub, &head);

        handle.enable_tracking();
        session.step(&mut BlankSource, Instant::now()).unwrap();
        let epoch = session.machine_epoch;

        // The loop has passed its enabled check when the handle switches tracking off.
        handle.disable_tracking();
        let late = MotionCommand::step(
            session.sequence.next(),
            CommandOrigin::Automatic,
            0.2,
            0.0,
            0.0,
        );
        assert_eq!(
            session.dispatcher.submit_for_epoch(late, epoch),
            Submission::Cancelled
        );
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(head.commands_sent(), 0);

        // Manual commands are unaffected.
        assert_eq!(handle.fine_tune(PtzDirection::Right), Submission::Queued);
        session.shutdown().unwrap();
    }

    #[test]
    fn fine_tune_works_in_any_phase_without_changing_it() {
        let stub = StubBackend::new();
        let head = SimulatedHead::new();
        let (mut session, handle, _events) = start(&stub, &head);

        assert_eq!(handle.fine_tune(PtzDirection::Left), Submission::Queued);
        let started = Instant::now();
        while head.commands_sent() == 0 && started.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(head.position().pan < 0.0);
        session.step(&mut BlankSource, Instant::now()).unwrap();
        assert_eq!(handle.tracking_state().phase, TrackingPhase::Idle);

        handle.enable_tracking();
        session.step(&mut BlankSource, Instant::now()).unwrap();
        handle.fine_tune(PtzDirection::Up);
        session.step(&mut BlankSource, Instant::now()).unwrap();
        assert_eq!(handle.tracking_state().phase, TrackingPhase::Searching);
        session.shutdown().unwrap();
    }

    #[test]
    fn repeated_unavailable_turns_tracking_off() {
        let stub = StubBackend::new();
        for _ in 0..3 {
            stub.push(Err(DetectorFailure::Unavailable("model not loaded".into())));
        }
        let head = SimulatedHead::new();
        let (mut session, handle, events) = start(&stub, &head);

        handle.enable_tracking();
        assert!(step_until(&mut session, |_| {
            events
                .try_iter()
                .any(|e| e == SessionEvent::DetectorUnavailable { consecutive: 3 })
        }));
        session.step(&mut BlankSource, Instant::now()).unwrap();
        assert_eq!(handle.tracking_state().phase, TrackingPhase::Idle);
        assert!(!handle.is_tracking_enabled());
        session.shutdown().unwrap();
    }

    #[test]
    fn actuator_failure_disconnects_and_stops_tracking() {
        let stub = StubBackend::new();
        stub.push_boxes(off_center());
        let head = SimulatedHead::new();
        head.fail_next(ActuatorError::Unreachable("no route to host".into()));
        let (mut session, handle, events) = start(&stub, &head);

        handle.enable_tracking();
        let mut failed = false;
        assert!(step_until(&mut session, |_| {
            failed |= events
                .try_iter()
                .any(|e| matches!(e, SessionEvent::ActuatorFailed { .. }));
            failed
        }));
        session.step(&mut BlankSource, Instant::now()).unwrap();
        assert!(!handle.connection().is_connected());
        assert_eq!(handle.tracking_state().phase, TrackingPhase::Idle);
        assert_eq!(handle.home(), Submission::Disconnected);

        handle.reconnect_actuator().unwrap();
        assert!(handle.connection().is_connected());
        assert!(events
            .try_iter()
            .any(|e| e == SessionEvent::ActuatorReconnected));
        session.shutdown().unwrap();
    }
}
