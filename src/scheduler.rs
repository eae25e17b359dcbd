//! Frame sampling and the detection worker.
//!
//! `FrameScheduler` decides when a frame is due and whether it may be handed to the
//! detector; at most one request is ever outstanding. `DetectionWorker` owns the detector
//! on its own thread so a slow inference never blocks sampling or command dispatch.

use anyhow::{anyhow, Context, Result};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::SchedulerSettings;
use crate::error::ConfigError;
use crate::detect::{DetectionBox, DetectorAdapter, DetectorOutcome};
use crate::frame::Frame;

// ----------------------------------------------------------------------------
// Scheduler core
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Not yet time to sample.
    NotDue,
    /// Hand the frame with this sequence to the detector.
    Submit { frame_sequence: u64 },
    /// A request is still in flight; the frame is discarded without queueing.
    Dropped { frame_sequence: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    /// Result for the current request, within the timeout.
    Fresh { latency: Duration },
    /// Result for a request already reported as timed out.
    Late { latency: Duration },
    /// No matching request; ignore.
    Unexpected,
}

#[derive(Clone, Copy, Debug)]
struct InFlight {
    frame_sequence: u64,
    submitted_at: Instant,
    timed_out: bool,
}

#[derive(Debug)]
pub struct FrameScheduler {
    interval: Duration,
    timeout: Duration,
    next_due: Option<Instant>,
    next_sequence: u64,
    in_flight: Option<InFlight>,
    dropped: u64,
}

impl FrameScheduler {
    pub fn new(settings: &SchedulerSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            interval: settings.sample_interval()?,
            timeout: settings.detection_timeout,
            next_due: None,
            next_sequence: 1,
            in_flight: None,
            dropped: 0,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn sample_due(&self, now: Instant) -> bool {
        self.next_due.map_or(true, |due| now >= due)
    }

    /// Time until the next sample, zero when already due.
    pub fn until_due(&self, now: Instant) -> Duration {
        self.next_due
            .map_or(Duration::ZERO, |due| due.saturating_duration_since(now))
    }

    /// Sample a frame if one is due and decide what happens to it.
    pub fn admit(&mut self, now: Instant) -> Admission {
        if !self.sample_due(now) {
            return Admission::NotDue;
        }
        // Keep the cadence, but never schedule a burst to catch up after a stall.
        let next = self.next_due.map_or(now, |due| due + self.interval);
        self.next_due = Some(if next <= now { now + self.interval } else { next });

        let frame_sequence = self.next_sequence;
        self.next_sequence += 1;

        if self.in_flight.is_some() {
            self.dropped += 1;
            return Admission::Dropped { frame_sequence };
        }
        self.in_flight = Some(InFlight {
            frame_sequence,
            submitted_at: now,
            timed_out: false,
        });
        Admission::Submit { frame_sequence }
    }

    /// Undo a `Submit` whose hand-off to the worker failed.
    pub fn cancel(&mut self, frame_sequence: u64) {
        if self
            .in_flight
            .is_some_and(|f| f.frame_sequence == frame_sequence)
        {
            self.in_flight = None;
        }
    }

    /// Report the pending request as timed out, once.
    pub fn check_timeout(&mut self, now: Instant) -> Option<u64> {
        let pending = self.in_flight.as_mut()?;
        if pending.timed_out || now.saturating_duration_since(pending.submitted_at) < self.timeout
        {
            return None;
        }
        pending.timed_out = true;
        Some(pending.frame_sequence)
    }

    /// A result arrived; frees the slot when it matches the outstanding request.
    pub fn complete(&mut self, frame_sequence: u64, now: Instant) -> Completion {
        match self.in_flight {
            Some(pending) if pending.frame_sequence == frame_sequence => {
                self.in_flight = None;
                let latency = now.saturating_duration_since(pending.submitted_at);
                if pending.timed_out {
                    Completion::Late { latency }
                } else {
                    Completion::Fresh { latency }
                }
            }
            _ => Completion::Unexpected,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }
}

// ----------------------------------------------------------------------------
// Detection worker thread
// ----------------------------------------------------------------------------

enum WorkerRequest {
    Detect {
        frame: Frame,
        hint: Option<DetectionBox>,
        epoch: u64,
    },
    Reset,
}

#[derive(Clone, Debug)]
pub struct DetectionResponse {
    pub frame_sequence: u64,
    pub epoch: u64,
    pub captured_at: Instant,
    pub outcome: DetectorOutcome,
    pub inference_time: Duration,
}

pub struct DetectionWorker {
    requests: Option<Sender<WorkerRequest>>,
    responses: Receiver<DetectionResponse>,
    join: Option<JoinHandle<()>>,
    model_name: &'static str,
}

impl DetectionWorker {
    pub fn spawn(mut adapter: DetectorAdapter) -> Result<Self> {
        let model_name = adapter.model_name();
        if let Err(err) = adapter.warm_up() {
            log::warn!("detector {}: warm-up failed: {}", model_name, err);
        }

        let (request_tx, request_rx) = mpsc::channel::<WorkerRequest>();
        let (response_tx, response_rx) = mpsc::channel();
        let join = thread::Builder::new()
            .name("ptz-detector".to_string())
            .spawn(move || {
                for request in request_rx {
                    match request {
                        WorkerRequest::Detect { frame, hint, epoch } => {
                            let started = Instant::now();
                            let outcome = adapter.request_detections(&frame, hint.as_ref());
                            let response = DetectionResponse {
                                frame_sequence: frame.sequence,
                                epoch,
                                captured_at: frame.captured_at,
                                outcome,
                                inference_time: started.elapsed(),
                            };
                            if response_tx.send(response).is_err() {
                                break;
                            }
                        }
                        WorkerRequest::Reset => adapter.reset(),
                    }
                }
                adapter.reset();
                log::debug!("detector worker stopped");
            })
            .context("spawn detector worker")?;

        Ok(Self {
            requests: Some(request_tx),
            responses: response_rx,
            join: Some(join),
            model_name,
        })
    }

    pub fn model_name(&self) -> &'static str {
        self.model_name
    }

    pub fn submit(&self, frame: Frame, hint: Option<DetectionBox>, epoch: u64) -> Result<()> {
        self.send(WorkerRequest::Detect { frame, hint, epoch })
    }

    /// End any tracker session the detector holds.
    pub fn reset(&self) -> Result<()> {
        self.send(WorkerRequest::Reset)
    }

    pub fn try_recv(&self) -> Result<Option<DetectionResponse>> {
        match self.responses.try_recv() {
            Ok(response) => Ok(Some(response)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(anyhow!("detector worker exited")),
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<DetectionResponse>> {
        match self.responses.recv_timeout(timeout) {
            Ok(response) => Ok(Some(response)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!("detector worker exited")),
        }
    }

    /// Close the request channel and wait for the in-progress inference, if any.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn send(&self, request: WorkerRequest) -> Result<()> {
        self.requests
            .as_ref()
            .ok_or_else(|| anyhow!("detector worker stopped"))?
            .send(request)
            .map_err(|_| anyhow!("detector worker exited"))
    }

    fn shutdown(&mut self) -> Result<()> {
        self.requests.take();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("detector worker thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for DetectionWorker {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("{}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubBackend;
    use crate::error::DetectorFailure;
    use crate::frame::Image;

    fn scheduler(fps: f32, timeout_ms: u64) -> FrameScheduler {
        FrameScheduler::new(&SchedulerSettings {
            target_fps: fps,
            detection_timeout: Duration::from_millis(timeout_ms),
        })
        .unwrap()
    }

    #[test]
    fn samples_on_cadence() {
        let mut s = scheduler(10.0, 500);
        let t0 = Instant::now();
        assert_eq!(s.admit(t0), Admission::Submit { frame_sequence: 1 });
        s.complete(1, t0);
        assert_eq!(s.admit(t0 + Duration::from_millis(50)), Admission::NotDue);
        assert_eq!(
            s.admit(t0 + Duration::from_millis(100)),
            Admission::Submit { frame_sequence: 2 }
        );
    }

    #[test]
    fn no_catch_up_burst_after_stall() {
        let mut s = scheduler(10.0, 500);
        let t0 = Instant::now();
        s.admit(t0);
        s.complete(1, t0);
        let late = t0 + Duration::from_secs(2);
        assert!(matches!(s.admit(late), Admission::Submit { .. }));
        s.complete(2, late);
        assert_eq!(s.admit(late + Duration::from_millis(1)), Admission::NotDue);
    }

    #[test]
    fn frames_are_dropped_while_busy_and_never_queued() {
        let mut s = scheduler(10.0, 5_000);
        let t0 = Instant::now();
        assert_eq!(s.admit(t0), Admission::Submit { frame_sequence: 1 });
        for i in 1..=5u64 {
            let at = t0 + Duration::from_millis(100 * i);
            assert_eq!(
                s.admit(at),
                Admission::Dropped {
                    frame_sequence: i + 1
                }
            );
        }
        assert_eq!(s.dropped_frames(), 5);
        assert!(matches!(
            s.complete(1, t0 + Duration::from_millis(550)),
            Completion::Fresh { .. }
        ));
        assert_eq!(
            s.admit(t0 + Duration::from_millis(600)),
            Admission::Submit { frame_sequence: 7 }
        );
    }

    #[test]
    fn timeout_is_reported_once_and_late_result_frees_the_slot() {
        let mut s = scheduler(10.0, 200);
        let t0 = Instant::now();
        s.admit(t0);
        assert_eq!(s.check_timeout(t0 + Duration::from_millis(199)), None);
        assert_eq!(s.check_timeout(t0 + Duration::from_millis(200)), Some(1));
        assert_eq!(s.check_timeout(t0 + Duration::from_millis(300)), None);
        assert!(s.is_busy());
        assert_eq!(
            s.complete(1, t0 + Duration::from_millis(400)),
            Completion::Late {
                latency: Duration::from_millis(400)
            }
        );
        assert!(!s.is_busy());
    }

    #[test]
    fn unmatched_completion_is_ignored() {
        let mut s = scheduler(10.0, 200);
        let t0 = Instant::now();
        s.admit(t0);
        assert_eq!(s.complete(9, t0), Completion::Unexpected);
        assert!(s.is_busy());
        s.cancel(1);
        assert!(!s.is_busy());
    }

    #[test]
    fn worker_answers_with_frame_metadata() {
        let stub = StubBackend::default();
        stub.push_boxes(vec![DetectionBox::new("person", 0.4, 0.5, 0.1, 0.2, 0.9)]);
        stub.push(Err(DetectorFailure::Unavailable("offline".into())));
        let worker = DetectionWorker::spawn(DetectorAdapter::new(Box::new(stub))).unwrap();
        assert_eq!(worker.model_name(), "stub");

        let captured_at = Instant::now();
        worker
            .submit(Frame::new(11, captured_at, Image::blank(8, 8)), None, 3)
            .unwrap();
        let response = worker
            .recv_timeout(Duration::from_secs(5))
            .unwrap()
            .expect("response");
        assert_eq!(response.frame_sequence, 11);
        assert_eq!(response.epoch, 3);
        assert_eq!(response.captured_at, captured_at);
        assert_eq!(response.outcome.object_count(), 1);

        worker
            .submit(Frame::new(12, Instant::now(), Image::blank(8, 8)), None, 3)
            .unwrap();
        let response = worker
            .recv_timeout(Duration::from_secs(5))
            .unwrap()
            .expect("response");
        assert_eq!(
            response.outcome,
            DetectorOutcome::Failure {
                kind: crate::error::FailureKind::Unavailable
            }
        );
        worker.stop().unwrap();
    }
}
