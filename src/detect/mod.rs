mod adapter;
mod backend;
pub mod backends;
mod registry;
mod result;

pub use adapter::{DetectorAdapter, TrackingMode};
pub use backend::{DetectorBackend, SubjectTracker, TrackerUpdate};
pub use backends::{BlobBackend, StubBackend};
pub use registry::DetectorRegistry;
pub use result::{DetectionBox, DetectorOutcome, SubjectId};
