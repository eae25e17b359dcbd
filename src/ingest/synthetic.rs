use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;

use crate::actuator::{HeadPosition, SimulatedHead};
use crate::frame::{FrameSource, Image};

const BACKGROUND_LUMA: u8 = 24;
const SUBJECT_LUMA: u8 = 220;

/// Parameters of the simulated scene.
#[derive(Clone, Debug)]
pub struct SceneConfig {
    pub width: u32,
    pub height: u32,
    /// Subject edge length as a fraction of the frame at 1x zoom.
    pub subject_size: f32,
    /// Peak subject excursion from the start position, in field-of-view widths.
    pub amplitude: f32,
    /// Seconds per full swing of the subject's path.
    pub period_s: f32,
    /// Capture rate the scene clock assumes.
    pub nominal_fps: f32,
    /// Maximum additive background noise (kept below the detector threshold).
    pub noise: u8,
    /// Probability that the subject is missing from a frame.
    pub dropout: f64,
    pub bitrate_kbps: Option<u32>,
    pub seed: u64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            width: 160,
            height: 90,
            subject_size: 0.1,
            amplitude: 0.6,
            period_s: 8.0,
            nominal_fps: 15.0,
            noise: 40,
            dropout: 0.05,
            bitrate_kbps: None,
            seed: 7,
        }
    }
}

/// A bright square wandering on a Lissajous path, filmed through a simulated PTZ head.
///
/// The head's position decides where the subject lands in each frame, so motion commands
/// sent to the same `SimulatedHead` close the loop.
pub struct SyntheticScene {
    config: SceneConfig,
    head: SimulatedHead,
    rng: StdRng,
    frames: u64,
    subject: Option<(f32, f32)>,
}

impl SyntheticScene {
    pub fn new(config: SceneConfig, head: SimulatedHead) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            head,
            frames: 0,
            subject: None,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames
    }

    /// Normalized image position of the subject in the last frame, if it was drawn.
    pub fn subject_in_frame(&self) -> Option<(f32, f32)> {
        self.subject
    }

    /// Subject position in world coordinates (field widths) at the current scene time.
    fn world_position(&self) -> (f32, f32) {
        let t = self.frames as f32 / self.config.nominal_fps;
        let phase = TAU * t / self.config.period_s;
        (
            self.config.amplitude * phase.sin(),
            0.5 * self.config.amplitude * (2.0 * phase).sin(),
        )
    }

    fn project(&self, head: HeadPosition) -> (f32, f32) {
        let (pan, tilt) = self.world_position();
        // Image y grows downward while tilt grows upward.
        (
            0.5 + (pan - head.pan) * head.zoom,
            0.5 - (tilt - head.tilt) * head.zoom,
        )
    }

    fn render(&mut self, subject: Option<(f32, f32)>, zoom: f32) -> Vec<u8> {
        let (w, h) = (self.config.width as usize, self.config.height as usize);
        let mut luma = Vec::with_capacity(w * h);
        for _ in 0..w * h {
            let noise = if self.config.noise == 0 {
                0
            } else {
                self.rng.gen_range(0..=self.config.noise)
            };
            luma.push(BACKGROUND_LUMA.saturating_add(noise));
        }

        if let Some((cx, cy)) = subject {
            let half = 0.5 * self.config.subject_size * zoom;
            let x0 = ((cx - half) * w as f32).max(0.0) as usize;
            let x1 = (((cx + half) * w as f32).max(0.0) as usize).min(w);
            let y0 = ((cy - half * w as f32 / h as f32) * h as f32).max(0.0) as usize;
            let y1 = (((cy + half * w as f32 / h as f32) * h as f32).max(0.0) as usize).min(h);
            for y in y0..y1 {
                for x in x0..x1 {
                    luma[y * w + x] = SUBJECT_LUMA;
                }
            }
        }
        luma
    }
}

impl FrameSource for SyntheticScene {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn capture(&mut self) -> Result<Image> {
        self.frames += 1;
        let head = self.head.position();
        let (x, y) = self.project(head);
        let visible = (0.0..=1.0).contains(&x) && (0.0..=1.0).contains(&y);
        let dropped = self.rng.gen_bool(self.config.dropout.clamp(0.0, 1.0));
        self.subject = (visible && !dropped).then_some((x, y));

        let luma = self.render(self.subject, head.zoom);
        Image::new(self.config.width, self.config.height, luma)
    }

    fn bitrate_kbps(&self) -> Option<u32> {
        self.config.bitrate_kbps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::Actuator;
    use crate::command::{CommandOrigin, MotionCommand};
    use crate::detect::{BlobBackend, DetectorBackend};
    use crate::frame::Frame;
    use std::time::Instant;

    fn still_scene(head: SimulatedHead) -> SyntheticScene {
        SyntheticScene::new(
            SceneConfig {
                amplitude: 0.0,
                dropout: 0.0,
                ..SceneConfig::default()
            },
            head,
        )
    }

    fn detect(image: Image) -> Vec<crate::detect::DetectionBox> {
        let frame = Frame::new(1, Instant::now(), image);
        BlobBackend::new("person").detect(&frame).unwrap()
    }

    #[test]
    fn noise_stays_below_the_blob_threshold() {
        let mut scene = SyntheticScene::new(
            SceneConfig {
                dropout: 1.0,
                ..SceneConfig::default()
            },
            SimulatedHead::new(),
        );
        let image = scene.capture().unwrap();
        assert!(scene.subject_in_frame().is_none());
        assert!(detect(image).is_empty());
    }

    #[test]
    fn subject_is_detected_where_it_was_drawn() {
        let mut scene = still_scene(SimulatedHead::new());
        let image = scene.capture().unwrap();
        let boxes = detect(image);
        assert_eq!(boxes.len(), 1);
        assert!((boxes[0].x - 0.5).abs() < 0.05);
        assert!((boxes[0].y - 0.5).abs() < 0.05);
    }

    #[test]
    fn panning_the_head_moves_the_subject_the_other_way() {
        let head = SimulatedHead::new();
        let mut scene = still_scene(head.clone());
        let mut actuator = head.clone();
        actuator
            .send(&MotionCommand::step(1, CommandOrigin::Manual, 0.2, 0.0, 0.0))
            .unwrap();
        scene.capture().unwrap();
        let (x, y) = scene.subject_in_frame().unwrap();
        assert!((x - 0.3).abs() < 1e-5);
        assert!((y - 0.5).abs() < 1e-5);
    }

    #[test]
    fn same_seed_same_frames() {
        let config = SceneConfig::default();
        let mut a = SyntheticScene::new(config.clone(), SimulatedHead::new());
        let mut b = SyntheticScene::new(config, SimulatedHead::new());
        for _ in 0..3 {
            assert_eq!(a.capture().unwrap().luma, b.capture().unwrap().luma);
        }
    }
}
