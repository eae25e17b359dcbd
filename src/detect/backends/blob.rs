use std::collections::HashMap;

use crate::detect::backend::{DetectorBackend, SubjectTracker, TrackerUpdate};
use crate::detect::result::{DetectionBox, SubjectId};
use crate::error::DetectorFailure;
use crate::frame::Frame;

const DEFAULT_THRESHOLD: u8 = 96;
const DEFAULT_MIN_PIXELS: usize = 4;
/// How far (normalized) a tracked subject may move between frames before it counts as lost.
const DEFAULT_SEARCH_MARGIN: f32 = 0.15;

/// CPU bright-blob detector.
///
/// Labels 4-connected regions above a luma threshold. Each region becomes one box whose
/// confidence is its mean brightness. Also works as a stateful tracker by restricting the
/// search to a window around the last known box.
pub struct BlobBackend {
    label: String,
    threshold: u8,
    min_pixels: usize,
    search_margin: f32,
    tracked: HashMap<SubjectId, DetectionBox>,
    next_id: u64,
}

impl BlobBackend {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            threshold: DEFAULT_THRESHOLD,
            min_pixels: DEFAULT_MIN_PIXELS,
            search_margin: DEFAULT_SEARCH_MARGIN,
            tracked: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn active_trackers(&self) -> usize {
        self.tracked.len()
    }

    fn components(&self, frame: &Frame) -> Vec<DetectionBox> {
        let (w, h) = (frame.width as usize, frame.height as usize);
        if w == 0 || h == 0 {
            return Vec::new();
        }
        let luma = frame.luma();
        let mut seen = vec![false; w * h];
        let mut boxes = Vec::new();
        let mut stack = Vec::new();

        for start in 0..w * h {
            if seen[start] || luma[start] <= self.threshold {
                continue;
            }
            seen[start] = true;
            stack.push(start);

            let (mut min_x, mut min_y, mut max_x, mut max_y) = (w, h, 0usize, 0usize);
            let mut count = 0usize;
            let mut sum = 0u64;

            while let Some(idx) = stack.pop() {
                let (x, y) = (idx % w, idx / w);
                count += 1;
                sum += luma[idx] as u64;
                min_x = min_x.min(x);
                max_x = max_x.max(x);
                min_y = min_y.min(y);
                max_y = max_y.max(y);

                let mut visit = |n: usize| {
                    if !seen[n] && luma[n] > self.threshold {
                        seen[n] = true;
                        stack.push(n);
                    }
                };
                if x > 0 {
                    visit(idx - 1);
                }
                if x + 1 < w {
                    visit(idx + 1);
                }
                if y > 0 {
                    visit(idx - w);
                }
                if y + 1 < h {
                    visit(idx + w);
                }
            }

            if count < self.min_pixels {
                continue;
            }
            let box_w = (max_x - min_x + 1) as f32 / w as f32;
            let box_h = (max_y - min_y + 1) as f32 / h as f32;
            let cx = (min_x + max_x + 1) as f32 / 2.0 / w as f32;
            let cy = (min_y + max_y + 1) as f32 / 2.0 / h as f32;
            let confidence = (sum as f32 / count as f32) / 255.0;
            boxes.push(DetectionBox::new(
                self.label.clone(),
                cx,
                cy,
                box_w,
                box_h,
                confidence,
            ));
        }
        boxes
    }
}

impl DetectorBackend for BlobBackend {
    fn name(&self) -> &'static str {
        "blob"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectionBox>, DetectorFailure> {
        if frame.luma().len() != frame.width as usize * frame.height as usize {
            return Err(DetectorFailure::Error("frame buffer size mismatch".into()));
        }
        Ok(self.components(frame))
    }
}

impl SubjectTracker for BlobBackend {
    fn start_tracking(&mut self, seed: &DetectionBox) -> Option<SubjectId> {
        if seed.width <= 0.0 || seed.height <= 0.0 {
            return None;
        }
        let id = SubjectId::new(format!("blob-{}", self.next_id));
        self.next_id += 1;
        self.tracked.insert(id.clone(), seed.clone());
        Some(id)
    }

    fn update_tracking(
        &mut self,
        id: &SubjectId,
        frame: &Frame,
    ) -> Result<Option<TrackerUpdate>, DetectorFailure> {
        let Some(last) = self.tracked.get(id).cloned() else {
            return Ok(None);
        };
        let reach_x = last.width / 2.0 + self.search_margin;
        let reach_y = last.height / 2.0 + self.search_margin;

        let nearest = self
            .detect(frame)?
            .into_iter()
            .filter(|b| (b.x - last.x).abs() <= reach_x && (b.y - last.y).abs() <= reach_y)
            .min_by(|a, b| a.center_distance(&last).total_cmp(&b.center_distance(&last)));

        match nearest {
            Some(found) => {
                let subject = found.with_subject(id.clone());
                self.tracked.insert(id.clone(), subject.clone());
                Ok(Some(TrackerUpdate {
                    subject,
                    is_lost: false,
                }))
            }
            None => Ok(Some(TrackerUpdate {
                subject: last,
                is_lost: true,
            })),
        }
    }

    fn stop_tracking(&mut self, id: &SubjectId) {
        self.tracked.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Image;
    use std::time::Instant;

    fn frame_with_square(seq: u64, x0: u32, y0: u32, side: u32, level: u8) -> Frame {
        let (w, h) = (20u32, 10u32);
        let mut luma = vec![0u8; (w * h) as usize];
        for y in y0..(y0 + side).min(h) {
            for x in x0..(x0 + side).min(w) {
                luma[(y * w + x) as usize] = level;
            }
        }
        Frame::new(seq, Instant::now(), Image::new(w, h, luma).unwrap())
    }

    #[test]
    fn finds_square_center_and_extent() {
        let mut backend = BlobBackend::new("ball");
        let boxes = backend.detect(&frame_with_square(1, 8, 4, 4, 255)).unwrap();
        assert_eq!(boxes.len(), 1);
        let b = &boxes[0];
        assert_eq!(b.label, "ball");
        assert!((b.x - 0.5).abs() < 1e-6);
        assert!((b.y - 0.6).abs() < 1e-6);
        assert!((b.width - 0.2).abs() < 1e-6);
        assert!((b.height - 0.4).abs() < 1e-6);
        assert!((b.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn dim_and_tiny_regions_are_ignored() {
        let mut backend = BlobBackend::new("ball");
        assert!(backend.detect(&frame_with_square(1, 2, 2, 4, 80)).unwrap().is_empty());
        assert!(backend.detect(&frame_with_square(2, 2, 2, 1, 255)).unwrap().is_empty());
    }

    #[test]
    fn tracker_follows_nearby_subject_and_reports_loss() {
        let mut backend = BlobBackend::new("ball");
        let seed = backend.detect(&frame_with_square(1, 4, 4, 3, 250)).unwrap()[0].clone();
        let id = backend.start_tracking(&seed).expect("tracker id");

        let update = backend
            .update_tracking(&id, &frame_with_square(2, 5, 4, 3, 250))
            .unwrap()
            .expect("known id");
        assert!(!update.is_lost);
        assert_eq!(update.subject.subject_id.as_ref(), Some(&id));
        assert!(update.subject.x > seed.x);

        let update = backend
            .update_tracking(&id, &frame_with_square(3, 17, 0, 3, 0))
            .unwrap()
            .expect("known id");
        assert!(update.is_lost);

        backend.stop_tracking(&id);
        assert_eq!(backend.active_trackers(), 0);
        assert!(backend
            .update_tracking(&id, &frame_with_square(4, 5, 4, 3, 250))
            .unwrap()
            .is_none());
    }
}
