//! Frames as they travel from the video source to the detector.
//!
//! - `Image`: what a `FrameSource` produces (8-bit luma plane).
//! - `Frame`: an image stamped by the scheduler with a capture sequence and capture instant.
//! - `FrameSource`: the live feed the scheduler samples from.
//!
//! Frames are cheap to clone (pixels are shared) so the scheduler can hand one to the
//! detection worker without copying.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ----------------------------------------------------------------------------
// Image: untimed pixels from a source
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    /// Row-major 8-bit luma, `width * height` bytes.
    pub luma: Vec<u8>,
}

impl Image {
    pub fn new(width: u32, height: u32, luma: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if luma.len() != expected {
            return Err(anyhow!(
                "image buffer is {} bytes, expected {} for {}x{}",
                luma.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            width,
            height,
            luma,
        })
    }

    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            luma: vec![0u8; width as usize * height as usize],
        }
    }
}

// ----------------------------------------------------------------------------
// Frame: image + capture stamp
// ----------------------------------------------------------------------------

/// A sampled frame. `sequence` is strictly increasing per session and is how late
/// detection results are recognised and discarded.
#[derive(Clone, Debug)]
pub struct Frame {
    pub sequence: u64,
    pub captured_at: Instant,
    pub width: u32,
    pub height: u32,
    luma: Arc<[u8]>,
}

impl Frame {
    pub fn new(sequence: u64, captured_at: Instant, image: Image) -> Self {
        Self {
            sequence,
            captured_at,
            width: image.width,
            height: image.height,
            luma: image.luma.into(),
        }
    }

    pub fn luma(&self) -> &[u8] {
        &self.luma
    }

    /// Luma value at pixel (x, y). Out-of-range coordinates read as black.
    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.luma[(y * self.width + x) as usize]
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.captured_at)
    }
}

// ----------------------------------------------------------------------------
// FrameSource: live feed
// ----------------------------------------------------------------------------

/// Live video feed. The scheduler calls `capture` only when a sample is due, so sources
/// never buffer on the tracker's behalf.
pub trait FrameSource: Send {
    fn name(&self) -> &str;

    fn capture(&mut self) -> Result<Image>;

    fn is_healthy(&self) -> bool {
        true
    }

    /// Stream bitrate in kbit/s when the source knows it.
    fn bitrate_kbps(&self) -> Option<u32> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_rejects_mismatched_buffer() {
        assert!(Image::new(4, 4, vec![0u8; 15]).is_err());
        assert!(Image::new(4, 4, vec![0u8; 16]).is_ok());
    }

    #[test]
    fn frame_pixel_reads_row_major_and_clips() {
        let mut luma = vec![0u8; 12];
        luma[4 + 2] = 200; // (x=2, y=1) in a 4x3 image
        let frame = Frame::new(1, Instant::now(), Image::new(4, 3, luma).unwrap());
        assert_eq!(frame.pixel(2, 1), 200);
        assert_eq!(frame.pixel(1, 2), 0);
        assert_eq!(frame.pixel(9, 9), 0);
    }
}
