//! Frame sources.
//!
//! Real deployments plug their camera feed in through `FrameSource`. The synthetic scene
//! here drives the demo and the end-to-end tests.

mod synthetic;

pub use synthetic::{SceneConfig, SyntheticScene};
