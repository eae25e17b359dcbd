//! PTZ Tracker
//!
//! Control core that keeps a motorized pan-tilt-zoom camera pointed at a subject by
//! turning object-detection results of unpredictable latency into rate-limited motor
//! commands.
//!
//! # Architecture
//!
//! ```text
//! FrameSource → FrameScheduler → DetectionWorker(DetectorAdapter)
//!            → TrackingStateMachine → MotionController → Dispatcher → Actuator
//! ```
//!
//! `TelemetryAggregator` observes every stage. A `TrackingSession` owns one loop; the UI
//! reads `TrackingState`/`PerformanceStats` snapshots and toggles tracking through a
//! `SessionHandle`.
//!
//! Invariants held by construction:
//!
//! 1. **At most one detection in flight**: frames sampled while busy are dropped, never queued.
//! 2. **Ordered results**: a result for a frame not newer than the last applied one is ignored.
//! 3. **Bounded motion**: every automatic step is clamped to `max_step`, and actuator calls are
//!    spaced by at least `min_interval`.
//! 4. **No blind retries**: a failed actuator call disconnects until an explicit reconnect.
//!
//! # Module Structure
//!
//! - `detect`: detector backends, the adapter, and the registry
//! - `scheduler`: sampling cadence and the detection worker thread
//! - `tracking`: the `Idle/Searching/Tracking/Locked/Lost` state machine
//! - `control`: deadzone, proportional step, smoothing
//! - `dispatch`, `actuator`: coalescing rate-limited delivery to the PTZ head
//! - `telemetry`, `session`: statistics and the owning context object

pub mod actuator;
pub mod command;
pub mod config;
pub mod control;
pub mod detect;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod scheduler;
pub mod session;
pub mod snapshot;
pub mod telemetry;
pub mod tracking;
pub mod ui;

pub use actuator::{Actuator, ConnectionState, LoggingActuator, SimulatedHead};
pub use command::{CommandOrigin, MotionAction, MotionCommand, PtzDirection, SequenceCounter};
pub use config::{OperationProfile, TrackerConfig};
pub use control::{MotionController, MotionDecision};
pub use detect::{
    DetectionBox, DetectorAdapter, DetectorBackend, DetectorOutcome, DetectorRegistry,
    SubjectId, SubjectTracker, TrackingMode,
};
pub use dispatch::{Dispatcher, Submission};
pub use error::{ActuatorError, ConfigError, DetectorFailure, FailureKind};
pub use frame::{Frame, FrameSource, Image};
pub use ingest::{SceneConfig, SyntheticScene};
pub use session::{SessionEvent, SessionHandle, TrackingSession};
pub use telemetry::PerformanceStats;
pub use tracking::{TrackingPhase, TrackingState};
